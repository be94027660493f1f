use proptest::prelude::*;
use warden_core::RouteDescriptor;
use warden_router::{ResolvedRoute, transform};

/// 生成同级路径互不相同的描述树：每个节点的路径由其在兄弟中的序号派生。
fn descriptor_tree() -> impl Strategy<Value = Vec<RouteDescriptor>> {
    let leaf = "[a-z]{1,6}".prop_map(|name| RouteDescriptor::new(name, String::new()));
    let tree = leaf.prop_recursive(3, 24, 4, |inner| {
        ("[a-z]{1,6}", prop::collection::vec(inner, 0..4)).prop_map(|(name, children)| {
            children
                .into_iter()
                .fold(RouteDescriptor::new(name, String::new()), RouteDescriptor::with_child)
        })
    });
    prop::collection::vec(tree, 0..5).prop_map(|mut roots| {
        assign_paths(&mut roots, true);
        roots
    })
}

fn assign_paths(level: &mut [RouteDescriptor], root: bool) {
    for (index, descriptor) in level.iter_mut().enumerate() {
        descriptor.path = if root {
            format!("/n{index}")
        } else {
            format!("n{index}")
        };
        assign_paths(&mut descriptor.children, false);
    }
}

fn names_preorder(descriptors: &[RouteDescriptor], out: &mut Vec<String>) {
    for descriptor in descriptors {
        out.push(descriptor.name.clone());
        names_preorder(&descriptor.children, out);
    }
}

proptest! {
    #[test]
    fn well_formed_trees_keep_every_node_in_order(descriptors in descriptor_tree()) {
        let outcome = transform(&descriptors);
        prop_assert!(outcome.dropped.is_empty());

        let expected: usize = descriptors.iter().map(RouteDescriptor::node_count).sum();
        prop_assert_eq!(outcome.node_count(), expected);

        let mut names = Vec::new();
        names_preorder(&descriptors, &mut names);
        let walked: Vec<String> = outcome
            .routes
            .iter()
            .flat_map(ResolvedRoute::walk)
            .map(|route| route.name.clone())
            .collect();
        prop_assert_eq!(walked, names);
    }

    #[test]
    fn meta_is_carried_verbatim(descriptors in descriptor_tree(), rank in any::<Option<i32>>()) {
        let descriptors: Vec<_> = descriptors
            .into_iter()
            .map(|mut descriptor| {
                descriptor.meta.rank = rank;
                descriptor
            })
            .collect();
        let outcome = transform(&descriptors);
        for (route, descriptor) in outcome.routes.iter().zip(&descriptors) {
            prop_assert_eq!(&route.meta, &descriptor.meta);
        }
    }
}
