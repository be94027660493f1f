//! # warden-http
//!
//! ## 定位与职责（Why）
//! - 为路由拉取、健康检查与文件传输提供统一的请求层：鉴权头、超时、连接前置检查与错误分类；
//! - 把传输故障归入 `Network | Timeout | Cors | Security | Server | Unknown` 六类，
//!   上层只依据分类决定重试、降级或清理凭据。
//!
//! ## 架构嵌入（Where）
//! - `error`：[`HttpError`] 与分类；
//! - `client`：[`HttpTransport`] 契约、`reqwest` 实现与 [`HttpClient`]；
//! - `health`：供连接管理器使用的 [`HttpHealthProbe`]；
//! - `source`：实现 [`warden_core::RouteSource`] 的 [`HttpRouteSource`]；
//! - `transfer`：下载/上传任务的状态机与登记表。

mod client;
mod error;
mod health;
mod source;
mod transfer;

pub use client::{
    BodyStream, BufferedBody, DEFAULT_CHUNK_SIZE, HttpClient, HttpRequest, HttpResponse,
    HttpTransport, Method, ReqwestTransport, RequestConfig, StreamingResponse,
};
pub use error::{HttpError, HttpErrorKind};
pub use health::HttpHealthProbe;
pub use source::HttpRouteSource;
pub use transfer::{
    TransferError, TransferHandle, TransferId, TransferKind, TransferManager, TransferSnapshot,
    TransferStatus,
};
