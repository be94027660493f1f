//! 后端描述到引擎节点的纯变换。
//!
//! # 契约说明（What）
//! - 递归处理 `children`，保持原有顺序与嵌套深度；输入只读；
//! - `meta` 原样搬运，本层不做任何授权判定；
//! - 路径为空、或拼接后的完整路径与同级节点冲突的描述连同其子树一起丢弃，记录告警并写入
//!   [`TransformOutcome::dropped`]；其余节点照常产出，宁可部分成功也不整体失败。

use std::collections::HashSet;

use warden_core::RouteDescriptor;
use warden_core::observability::targets;

use crate::resolved::{ResolvedRoute, ResolvedRouteKind};

/// 变换结果。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransformOutcome {
    pub routes: Vec<ResolvedRoute>,
    pub dropped: Vec<DroppedRoute>,
}

impl TransformOutcome {
    /// 产出的节点总数（含子节点）。
    pub fn node_count(&self) -> usize {
        self.routes.iter().map(ResolvedRoute::node_count).sum()
    }
}

/// 被丢弃的描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DroppedRoute {
    pub name: String,
    pub path: String,
    /// 所在层级的父路径，根层为 `/`。
    pub parent_path: String,
    pub reason: DropReason,
    /// 随之丢弃的节点数（含自身）。
    pub subtree_size: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    EmptyPath,
    DuplicateSiblingPath,
}

/// 把后端描述变换为引擎节点。
pub fn transform(descriptors: &[RouteDescriptor]) -> TransformOutcome {
    let mut dropped = Vec::new();
    let routes = transform_level(descriptors, "/", &mut dropped);
    TransformOutcome { routes, dropped }
}

fn transform_level(
    descriptors: &[RouteDescriptor],
    parent_path: &str,
    dropped: &mut Vec<DroppedRoute>,
) -> Vec<ResolvedRoute> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut routes = Vec::with_capacity(descriptors.len());

    for descriptor in descriptors {
        let path = descriptor.path.trim();
        let resolved = if path.is_empty() {
            Err(DropReason::EmptyPath)
        } else {
            let full_path = join_path(parent_path, path);
            if seen.insert(full_path.clone()) {
                Ok(full_path)
            } else {
                Err(DropReason::DuplicateSiblingPath)
            }
        };
        let full_path = match resolved {
            Ok(full_path) => full_path,
            Err(reason) => {
                let subtree_size = descriptor.node_count();
                tracing::warn!(
                    target: targets::TRANSFORM,
                    name = %descriptor.name,
                    path = %descriptor.path,
                    parent = parent_path,
                    ?reason,
                    subtree_size,
                    "dropping malformed route descriptor"
                );
                dropped.push(DroppedRoute {
                    name: descriptor.name.clone(),
                    path: descriptor.path.clone(),
                    parent_path: parent_path.to_owned(),
                    reason,
                    subtree_size,
                });
                continue;
            }
        };
        let kind = match &descriptor.redirect {
            Some(target) => ResolvedRouteKind::Redirect {
                target: target.clone(),
                component: descriptor.component.clone(),
                children: transform_level(&descriptor.children, &full_path, dropped),
            },
            None if !descriptor.children.is_empty() => ResolvedRouteKind::Group {
                component: descriptor.component.clone(),
                children: transform_level(&descriptor.children, &full_path, dropped),
            },
            None => ResolvedRouteKind::Leaf {
                component: descriptor.component.clone(),
            },
        };
        routes.push(ResolvedRoute {
            name: descriptor.name.clone(),
            path: path.to_owned(),
            full_path,
            meta: descriptor.meta.clone(),
            kind,
        });
    }
    routes
}

/// 绝对路径直接采用；相对路径挂到父路径之下。
pub(crate) fn join_path(parent: &str, path: &str) -> String {
    if path.starts_with('/') {
        return normalize(path);
    }
    let parent = parent.trim_end_matches('/');
    normalize(&format!("{parent}/{path}"))
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::RouteMeta;

    #[test]
    fn nesting_order_and_meta_are_preserved() {
        let meta = RouteMeta {
            title_key: Some("menus.system".into()),
            rank: Some(3),
            ..RouteMeta::default()
        };
        let descriptors = vec![
            RouteDescriptor::new("System", "/system")
                .with_component("Layout")
                .with_meta(meta.clone())
                .with_child(RouteDescriptor::new("SystemUser", "user").with_component("system/user"))
                .with_child(RouteDescriptor::new("SystemRole", "/system/role")),
            RouteDescriptor::new("Home", "/").with_redirect("/welcome"),
            RouteDescriptor::new("Monitor", "/monitor")
                .with_component("Layout")
                .with_redirect("/monitor/online")
                .with_child(RouteDescriptor::new("Online", "online").with_component("monitor/online")),
        ];
        let before = descriptors.clone();

        let outcome = transform(&descriptors);
        assert_eq!(descriptors, before);
        assert!(outcome.dropped.is_empty());
        assert_eq!(outcome.node_count(), 6);

        let system = &outcome.routes[0];
        assert_eq!(system.meta, meta);
        assert_eq!(system.component(), Some("Layout"));
        let children: Vec<_> = system
            .children()
            .iter()
            .map(|child| child.full_path.as_str())
            .collect();
        assert_eq!(children, ["/system/user", "/system/role"]);
        assert_eq!(outcome.routes[1].redirect_target(), Some("/welcome"));
        assert_eq!(outcome.routes[1].full_path, "/");
        assert_eq!(outcome.routes[1].component(), None);

        let monitor = &outcome.routes[2];
        assert_eq!(monitor.redirect_target(), Some("/monitor/online"));
        assert_eq!(monitor.component(), Some("Layout"));
        assert_eq!(monitor.children()[0].full_path, "/monitor/online");
        assert_eq!(monitor.children()[0].component(), Some("monitor/online"));
    }

    #[test]
    fn siblings_resolving_to_the_same_full_path_collide() {
        let descriptors = vec![
            RouteDescriptor::new("System", "/system")
                .with_child(RouteDescriptor::new("User", "user"))
                .with_child(RouteDescriptor::new("UserAbsolute", "/system/user/"))
                .with_child(RouteDescriptor::new("Role", "role")),
        ];

        let outcome = transform(&descriptors);
        let children: Vec<_> = outcome.routes[0]
            .children()
            .iter()
            .map(|child| child.name.as_str())
            .collect();
        assert_eq!(children, ["User", "Role"]);
        assert_eq!(outcome.dropped.len(), 1);
        assert_eq!(outcome.dropped[0].name, "UserAbsolute");
        assert_eq!(outcome.dropped[0].parent_path, "/system");
        assert_eq!(outcome.dropped[0].reason, DropReason::DuplicateSiblingPath);
    }

    #[test]
    fn malformed_siblings_are_dropped_with_subtree() {
        let descriptors = vec![
            RouteDescriptor::new("A", "/a"),
            RouteDescriptor::new("Missing", "  ")
                .with_child(RouteDescriptor::new("Orphan", "orphan")),
            RouteDescriptor::new("ADuplicate", "/a")
                .with_child(RouteDescriptor::new("Lost", "lost")),
            RouteDescriptor::new("B", "/b"),
        ];

        let outcome = transform(&descriptors);
        let names: Vec<_> = outcome.routes.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["A", "B"]);
        assert_eq!(outcome.dropped.len(), 2);
        assert_eq!(outcome.dropped[0].reason, DropReason::EmptyPath);
        assert_eq!(outcome.dropped[0].subtree_size, 2);
        assert_eq!(outcome.dropped[1].reason, DropReason::DuplicateSiblingPath);
        assert_eq!(outcome.dropped[1].name, "ADuplicate");
    }

    #[test]
    fn same_path_under_different_parents_is_allowed() {
        let descriptors = vec![
            RouteDescriptor::new("A", "/a").with_child(RouteDescriptor::new("AList", "list")),
            RouteDescriptor::new("B", "/b").with_child(RouteDescriptor::new("BList", "list")),
        ];
        let outcome = transform(&descriptors);
        assert!(outcome.dropped.is_empty());
        assert_eq!(outcome.routes[1].children()[0].full_path, "/b/list");
    }

    #[test]
    fn join_handles_root_and_trailing_slashes() {
        assert_eq!(join_path("/", "dashboard"), "/dashboard");
        assert_eq!(join_path("/system/", "user/"), "/system/user");
        assert_eq!(join_path("/system", "/abs"), "/abs");
    }
}
