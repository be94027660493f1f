use warden_core::RouteMeta;

/// 路由引擎可直接装载的路由节点。
///
/// `path` 保留后端声明的原始片段，`full_path` 为自根节点拼接后的绝对路径；
/// `meta` 与描述中的元数据逐字段一致。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub name: String,
    pub path: String,
    pub full_path: String,
    pub meta: RouteMeta,
    pub kind: ResolvedRouteKind,
}

/// 节点形态。
///
/// - `Leaf`：渲染组件的叶子；
/// - `Group`：带子路由的分组，组件通常是布局；
/// - `Redirect`：访问时跳转到 `target`，可同时携带布局组件并挂载子路由。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedRouteKind {
    Leaf {
        component: Option<String>,
    },
    Group {
        component: Option<String>,
        children: Vec<ResolvedRoute>,
    },
    Redirect {
        target: String,
        component: Option<String>,
        children: Vec<ResolvedRoute>,
    },
}

impl ResolvedRoute {
    pub fn children(&self) -> &[ResolvedRoute] {
        match &self.kind {
            ResolvedRouteKind::Leaf { .. } => &[],
            ResolvedRouteKind::Group { children, .. }
            | ResolvedRouteKind::Redirect { children, .. } => children,
        }
    }

    pub fn component(&self) -> Option<&str> {
        match &self.kind {
            ResolvedRouteKind::Leaf { component }
            | ResolvedRouteKind::Group { component, .. }
            | ResolvedRouteKind::Redirect { component, .. } => component.as_deref(),
        }
    }

    pub fn redirect_target(&self) -> Option<&str> {
        match &self.kind {
            ResolvedRouteKind::Redirect { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn required_roles(&self) -> &[String] {
        self.meta.required_roles()
    }

    /// 以自身为根的节点总数。
    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(Self::node_count).sum::<usize>()
    }

    /// 先序遍历以自身为根的子树。
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }
}

/// [`ResolvedRoute::walk`] 返回的先序迭代器。
pub struct Walk<'a> {
    stack: Vec<&'a ResolvedRoute>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a ResolvedRoute;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().iter().rev());
        Some(node)
    }
}
