//! 后端授权路由描述与标签页模型。
//!
//! # 模块定位（Why）
//! - [`RouteDescriptor`] 是后端 `GET /auth/routes` 返回的原始形态，同时也是构建期静态路由的声明形态；
//!   两者共用一套结构，合并查询时无需互转。
//! - 序列化字段采用 camelCase，与后端 JSON 保持一致；缺失字段一律取默认值，
//!   让“形态不合法”的条目能进入变换管线后再被逐条丢弃，而不是让整批反序列化失败。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 后端授权的单条路由描述。
///
/// # 契约说明（What）
/// - `path`：同级唯一；为空视为形态不合法；
/// - `name`：在合并后的静态 + 动态路由表中全局唯一，冲突时注册失败但不致命；
/// - `component`：不透明的组件引用，本层不解释其含义；
/// - `redirect`：存在时该路由为重定向节点；
/// - `children`：保持后端给出的顺序。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteDescriptor {
    pub path: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RouteDescriptor>,
    pub meta: RouteMeta,
}

impl RouteDescriptor {
    /// 以名称与路径构造最小描述。
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// 设置组件引用。
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// 设置重定向目标。
    pub fn with_redirect(mut self, target: impl Into<String>) -> Self {
        self.redirect = Some(target.into());
        self
    }

    /// 追加子路由。
    pub fn with_child(mut self, child: RouteDescriptor) -> Self {
        self.children.push(child);
        self
    }

    /// 覆盖元数据。
    pub fn with_meta(mut self, meta: RouteMeta) -> Self {
        self.meta = meta;
        self
    }

    /// 设置访问所需角色。
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta.roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    /// 统计以自身为根的节点总数。
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Self::node_count).sum::<usize>()
    }
}

/// 路由元数据。所有字段均可缺省，变换管线按原样搬运，不做任何授权判定。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteMeta {
    /// 标题的国际化键。后端历史上使用 `title` 字段名。
    #[serde(alias = "title", skip_serializing_if = "Option::is_none")]
    pub title_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_link: Option<bool>,
    /// 所属布局标签。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletable: Option<bool>,
}

impl RouteMeta {
    /// 访问所需角色；缺省或为空都表示不限制。
    pub fn required_roles(&self) -> &[String] {
        self.roles.as_deref().unwrap_or(&[])
    }

    /// 是否出现在菜单中，缺省为 `true`。
    pub fn is_visible(&self) -> bool {
        self.show_link.unwrap_or(true)
    }
}

/// 标签页条目，由已解析路由派生。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabItem {
    pub name: String,
    pub path: String,
    pub label: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub fixed: bool,
    pub deletable: bool,
}

/// 授权路由的获取来源。
///
/// # 契约说明（What）
/// - 实现者负责携带认证信息发起请求，并把失败映射为带分类的 [`CoreError`](crate::CoreError)；
/// - 返回空列表是合法结果，表示该用户没有额外的动态路由；
/// - 认证上下文失效（例如后端返回 401）必须以 `ErrorCategory::Unauthenticated` 分类返回，
///   初始化器据此判定为不可重试。
#[async_trait]
pub trait RouteSource: Send + Sync + 'static {
    /// 拉取当前用户被授权的路由描述。
    async fn fetch_routes(&self) -> Result<Vec<RouteDescriptor>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_backend_shape_with_missing_fields() {
        let json = r#"[
            {"path": "/system", "name": "System", "meta": {"title": "menus.system", "rank": 2},
             "children": [{"path": "/system/user", "name": "SystemUser",
                           "component": "system/user/index", "meta": {"roles": ["admin"]}}]},
            {"name": "NoPath"}
        ]"#;
        let routes: Vec<RouteDescriptor> = serde_json::from_str(json).expect("valid json");
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].meta.title_key.as_deref(), Some("menus.system"));
        assert_eq!(routes[0].children[0].meta.required_roles(), ["admin".to_owned()]);
        assert!(routes[1].path.is_empty());
        assert_eq!(routes[0].node_count(), 2);
    }

    #[test]
    fn meta_defaults_are_permissive() {
        let meta = RouteMeta::default();
        assert!(meta.required_roles().is_empty());
        assert!(meta.is_visible());
    }
}
