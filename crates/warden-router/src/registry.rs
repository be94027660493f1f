use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use thiserror::Error;
use warden_core::observability::targets;
use warden_core::{CoreError, RouteMeta, codes};

use crate::resolved::ResolvedRoute;

/// 路由来源：构建期声明的静态路由或后端授权的动态路由。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteOrigin {
    Static,
    Dynamic,
}

/// 单条注册失败。注册失败不致命，调用方记录后跳过即可。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("route name `{name}` is already registered")]
    NameConflict { name: String },
    #[error("route `{name}` has an unusable path `{path}`")]
    InvalidPath { name: String, path: String },
}

impl From<RegistrationError> for CoreError {
    fn from(value: RegistrationError) -> Self {
        let code = match value {
            RegistrationError::NameConflict { .. } => codes::ROUTE_NAME_CONFLICT,
            RegistrationError::InvalidPath { .. } => codes::ROUTE_INVALID_PATH,
        };
        CoreError::new(code, value.to_string())
    }
}

/// 批量注册的统计。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    pub registered: usize,
    pub skipped: Vec<RegistrationError>,
}

/// 路由引擎契约。
///
/// # 契约说明（What）
/// - `register_batch` 对调用方表现为原子操作：要么观察到整批新增，要么一条也观察不到；
/// - 名称冲突的节点被跳过并计入 [`RegistrationReport::skipped`]，不影响同批其它节点；
/// - `resolve` 只读，不得阻塞写入方。
pub trait RouterEngine: Send + Sync + 'static {
    fn has_route(&self, name: &str) -> bool;

    fn register_batch(&self, routes: &[ResolvedRoute], origin: RouteOrigin) -> RegistrationReport;

    fn remove_route(&self, name: &str) -> bool;

    /// 移除某一来源的全部节点，返回移除数量。
    fn remove_origin(&self, origin: RouteOrigin) -> usize;

    fn resolve(&self, path: &str) -> Option<RouteMatch>;
}

/// 注册表中的一条记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisteredRoute {
    pub name: String,
    pub full_path: String,
    pub meta: RouteMeta,
    pub origin: RouteOrigin,
    pub parent: Option<String>,
    pub redirect: Option<String>,
}

/// `resolve` 的命中结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteMatch {
    pub route: RegisteredRoute,
    /// 参数段与通配段捕获的值，按出现顺序排列；通配段以 `*` 为键。
    pub params: Vec<(String, String)>,
}

impl RouteMatch {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Parameter(String),
    Wildcard,
}

#[derive(Clone, Debug)]
struct RouteEntry {
    route: RegisteredRoute,
    pattern: Vec<Segment>,
}

/// `ArcSwap` 的载荷：按注册顺序排列的记录与名称索引。
#[derive(Clone, Debug, Default)]
struct RouteTable {
    entries: Vec<RouteEntry>,
    by_name: HashMap<String, usize>,
}

impl RouteTable {
    fn insert(&mut self, entry: RouteEntry) {
        self.by_name
            .insert(entry.route.name.clone(), self.entries.len());
        self.entries.push(entry);
    }

    fn retain(&mut self, mut keep: impl FnMut(&RegisteredRoute) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| keep(&entry.route));
        self.by_name = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (entry.route.name.clone(), index))
            .collect();
        before - self.entries.len()
    }
}

/// 以名称为键的路由注册表。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 导航守卫在每次导航时读取路由表，初始化器只在登录后写入一次；读多写少，
///   适合“读路径零锁、写路径整表替换”的热更新模式；
/// - 以名称为键的索引取代原地修改路由数组，注册即一次纯插入，冲突显式返回。
///
/// ## 逻辑 (How)
/// - 路由表由 [`ArcSwap`] 持有，读者 `load` 后顺序匹配；
/// - 写者在互斥锁内克隆当前表、批量插入、一次 `store`，并递增修订号；
/// - 路径匹配支持字面量、`:param` 参数段与 `*`（或 `:name(.*)*`）通配段，按注册顺序取第一条命中。
///
/// ## 契约 (What)
/// - 同名节点只保留先注册者；
/// - 批量注册在 `store` 之前对并发读者完全不可见。
pub struct RouteRegistry {
    table: ArcSwap<RouteTable>,
    writer: Mutex<()>,
    revision: AtomicU64,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(RouteTable::default()),
            writer: Mutex::new(()),
            revision: AtomicU64::new(0),
        }
    }

    /// 注册单个节点（不含子节点）。
    pub fn register(
        &self,
        route: &ResolvedRoute,
        parent: Option<&str>,
        origin: RouteOrigin,
    ) -> Result<(), RegistrationError> {
        let _guard = self.writer.lock();
        let mut table = RouteTable::clone(&self.table.load());
        Self::insert_checked(&mut table, route, parent, origin)?;
        self.commit(table);
        Ok(())
    }

    /// 当前修订号，每次成功写入后递增。
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.table.load().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<RegisteredRoute> {
        let table = self.table.load();
        table
            .by_name
            .get(name)
            .map(|index| table.entries[*index].route.clone())
    }

    /// 按注册顺序列出名称。
    pub fn names(&self) -> Vec<String> {
        self.table
            .load()
            .entries
            .iter()
            .map(|entry| entry.route.name.clone())
            .collect()
    }

    fn insert_checked(
        table: &mut RouteTable,
        route: &ResolvedRoute,
        parent: Option<&str>,
        origin: RouteOrigin,
    ) -> Result<(), RegistrationError> {
        if table.by_name.contains_key(&route.name) {
            return Err(RegistrationError::NameConflict {
                name: route.name.clone(),
            });
        }
        if route.name.trim().is_empty() || !route.full_path.starts_with('/') {
            return Err(RegistrationError::InvalidPath {
                name: route.name.clone(),
                path: route.full_path.clone(),
            });
        }
        table.insert(RouteEntry {
            pattern: parse_pattern(&route.full_path),
            route: RegisteredRoute {
                name: route.name.clone(),
                full_path: route.full_path.clone(),
                meta: route.meta.clone(),
                origin,
                parent: parent.map(str::to_owned),
                redirect: route.redirect_target().map(str::to_owned),
            },
        });
        Ok(())
    }

    fn commit(&self, table: RouteTable) {
        self.table.store(Arc::new(table));
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterEngine for RouteRegistry {
    fn has_route(&self, name: &str) -> bool {
        self.table.load().by_name.contains_key(name)
    }

    fn register_batch(&self, routes: &[ResolvedRoute], origin: RouteOrigin) -> RegistrationReport {
        let _guard = self.writer.lock();
        let mut table = RouteTable::clone(&self.table.load());
        let mut report = RegistrationReport::default();

        let mut pending: Vec<(&ResolvedRoute, Option<&str>)> =
            routes.iter().rev().map(|route| (route, None)).collect();
        while let Some((route, parent)) = pending.pop() {
            match Self::insert_checked(&mut table, route, parent, origin) {
                Ok(()) => report.registered += 1,
                Err(err) => {
                    tracing::warn!(target: targets::REGISTRY, error = %err, "skipping route registration");
                    report.skipped.push(err);
                }
            }
            pending.extend(
                route
                    .children()
                    .iter()
                    .rev()
                    .map(|child| (child, Some(route.name.as_str()))),
            );
        }

        if report.registered > 0 {
            self.commit(table);
        }
        tracing::debug!(
            target: targets::REGISTRY,
            ?origin,
            registered = report.registered,
            skipped = report.skipped.len(),
            revision = self.revision(),
            "route batch registered"
        );
        report
    }

    fn remove_route(&self, name: &str) -> bool {
        let _guard = self.writer.lock();
        let mut table = RouteTable::clone(&self.table.load());
        let removed = table.retain(|route| route.name != name) > 0;
        if removed {
            self.commit(table);
        }
        removed
    }

    fn remove_origin(&self, origin: RouteOrigin) -> usize {
        let _guard = self.writer.lock();
        let mut table = RouteTable::clone(&self.table.load());
        let removed = table.retain(|route| route.origin != origin);
        if removed > 0 {
            self.commit(table);
            tracing::info!(target: targets::REGISTRY, ?origin, removed, "routes removed");
        }
        removed
    }

    fn resolve(&self, path: &str) -> Option<RouteMatch> {
        let target = split_target(path);
        let table = self.table.load();
        table.entries.iter().find_map(|entry| {
            match_pattern(&entry.pattern, &target).map(|params| RouteMatch {
                route: entry.route.clone(),
                params,
            })
        })
    }
}

impl std::fmt::Debug for RouteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteRegistry")
            .field("routes", &self.len())
            .field("revision", &self.revision())
            .finish()
    }
}

fn parse_pattern(full_path: &str) -> Vec<Segment> {
    full_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if segment == "*" || (segment.starts_with(':') && segment.ends_with("(.*)*")) {
                Segment::Wildcard
            } else if let Some(name) = segment.strip_prefix(':') {
                Segment::Parameter(name.trim_end_matches('?').to_owned())
            } else {
                Segment::Literal(segment.to_owned())
            }
        })
        .collect()
}

/// 去掉查询串与片段后切分路径段。
fn split_target(path: &str) -> Vec<&str> {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    path[..end]
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// 逐段比对模式与目标，命中时返回捕获的参数。
fn match_pattern(pattern: &[Segment], target: &[&str]) -> Option<Vec<(String, String)>> {
    let mut params = Vec::new();
    let mut target_iter = target.iter();

    for segment in pattern {
        match segment {
            Segment::Literal(expected) => {
                let actual = target_iter.next()?;
                if *actual != expected.as_str() {
                    return None;
                }
            }
            Segment::Parameter(name) => {
                let actual = target_iter.next()?;
                params.push((name.clone(), (*actual).to_owned()));
            }
            Segment::Wildcard => {
                let rest: Vec<&str> = target_iter.copied().collect();
                params.push(("*".to_owned(), rest.join("/")));
                return Some(params);
            }
        }
    }

    if target_iter.next().is_some() {
        return None;
    }
    Some(params)
}
