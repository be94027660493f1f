use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use warden_core::observability::targets;
use warden_core::storage::{load_json, open_store, save_json};
use warden_core::{
    EventBus, KeyValueStore, RouteDescriptor, StorageConfig, StorageError, TabItem, WardenEvent,
};

/// 权限状态。
///
/// 会话开始时为空；`static_routes` 由初始化器写入一次，`dynamic_routes` 在拉取成功后写入，
/// `is_dynamic_routes_loaded` 只在注册完成（或重试耗尽降级）后翻转；登出时整体复位。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PermissionState {
    pub static_routes: Vec<RouteDescriptor>,
    pub dynamic_routes: Vec<RouteDescriptor>,
    pub is_dynamic_routes_loaded: bool,
    pub tabs: Vec<TabItem>,
}

/// 落盘形态；刻意不含加载标记，每个会话都必须重新计算。
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedPermission {
    #[serde(default)]
    static_routes: Vec<RouteDescriptor>,
    #[serde(default)]
    dynamic_routes: Vec<RouteDescriptor>,
    #[serde(default)]
    tabs: Vec<TabItem>,
}

/// 关闭标签页的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseTab {
    Closed,
    /// 固定或不可删除的标签页。
    Protected,
    NotFound,
}

/// 进程级权限状态服务。
///
/// # 教案式说明
/// - **意图 (Why)**：路由集合、加载标记与标签页由初始化器和导航守卫共同读写，
///   以显式构造、按引用传递的服务代替全局单例，测试可以各自构造独立实例。
/// - **逻辑 (How)**：状态位于 `parking_lot::RwLock` 中，所有方法在返回前释放锁，
///   锁绝不跨越 `.await`；变更后按需向 [`EventBus`] 广播摘要事件。挂接存储时，
///   路由集合与标签页的每次变更都会立即写穿，写入失败只记录告警。
/// - **契约 (What)**：
///   - `persist` 只写 `static_routes`、`dynamic_routes` 与 `tabs`；
///   - `restore` 永远把加载标记复位为 `false`；
///   - `reset` 清空全部状态、删除持久化条目并推进会话纪元；
///   - [`within_epoch`](Self::within_epoch) 与 `reset` 互斥，纪元过期的写入被整体丢弃。
pub struct PermissionStore {
    state: RwLock<PermissionState>,
    epoch: Mutex<u64>,
    storage: Option<Arc<dyn KeyValueStore>>,
    key: String,
    events: Option<EventBus>,
}

impl PermissionStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(PermissionState::default()),
            epoch: Mutex::new(0),
            storage: None,
            key: "warden-permission".to_owned(),
            events: None,
        }
    }

    /// 以 `<prefix>-permission` 为键挂接持久化存储。
    pub fn with_storage(mut self, storage: Arc<dyn KeyValueStore>, prefix: &str) -> Self {
        self.storage = Some(storage);
        self.key = format!("{prefix}-permission");
        self
    }

    /// 按配置打开存储并挂接，键前缀取自 `config.prefix`。
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Ok(Self::new().with_storage(open_store(config)?, &config.prefix))
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn storage_key(&self) -> &str {
        &self.key
    }

    /// 当前会话纪元，每次 `reset` 加一。
    pub fn epoch(&self) -> u64 {
        *self.epoch.lock()
    }

    /// 纪元仍为 `epoch` 时执行 `apply` 并返回 `Some`，否则返回 `None`。
    ///
    /// 执行期间持有纪元锁，`reset` 会等待其完成；`apply` 内不得再调用本方法或 `reset`。
    pub fn within_epoch<R>(&self, epoch: u64, apply: impl FnOnce() -> R) -> Option<R> {
        let current = self.epoch.lock();
        if *current != epoch {
            return None;
        }
        Some(apply())
    }

    pub fn snapshot(&self) -> PermissionState {
        self.state.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().is_dynamic_routes_loaded
    }

    pub fn set_loaded(&self, loaded: bool) {
        let dynamic_routes = {
            let mut state = self.state.write();
            if state.is_dynamic_routes_loaded == loaded {
                return;
            }
            state.is_dynamic_routes_loaded = loaded;
            state.dynamic_routes.len()
        };
        self.publish(WardenEvent::RoutesChanged {
            dynamic_routes,
            loaded,
        });
    }

    pub fn set_static_routes(&self, routes: Vec<RouteDescriptor>) {
        self.state.write().static_routes = routes;
        self.write_through();
    }

    pub fn static_routes(&self) -> Vec<RouteDescriptor> {
        self.state.read().static_routes.clone()
    }

    pub fn set_dynamic_routes(&self, routes: Vec<RouteDescriptor>) {
        let (dynamic_routes, loaded) = {
            let mut state = self.state.write();
            state.dynamic_routes = routes;
            (state.dynamic_routes.len(), state.is_dynamic_routes_loaded)
        };
        self.write_through();
        self.publish(WardenEvent::RoutesChanged {
            dynamic_routes,
            loaded,
        });
    }

    pub fn dynamic_routes(&self) -> Vec<RouteDescriptor> {
        self.state.read().dynamic_routes.clone()
    }

    /// 静态路由在前、动态路由在后的合并视图。
    pub fn all_routes(&self) -> Vec<RouteDescriptor> {
        let state = self.state.read();
        state
            .static_routes
            .iter()
            .chain(&state.dynamic_routes)
            .cloned()
            .collect()
    }

    /// 菜单树：剔除 `show_link == false` 的节点，各层按 `rank` 升序，未设置 `rank` 的排在最后。
    pub fn menu_tree(&self) -> Vec<RouteDescriptor> {
        menu_level(&self.all_routes())
    }

    pub fn tabs(&self) -> Vec<TabItem> {
        self.state.read().tabs.clone()
    }

    pub fn active_tab(&self) -> Option<TabItem> {
        self.state.read().tabs.iter().find(|tab| tab.active).cloned()
    }

    /// 打开标签页并激活；同名标签页已存在时只更新路径并激活。
    pub fn open_tab(&self, tab: TabItem) {
        let name = tab.name.clone();
        {
            let mut state = self.state.write();
            match state.tabs.iter().position(|existing| existing.name == tab.name) {
                Some(index) => state.tabs[index].path = tab.path,
                None => state.tabs.push(tab),
            }
            for existing in &mut state.tabs {
                existing.active = existing.name == name;
            }
        }
        self.write_through();
        self.publish(WardenEvent::TabsChanged { active: Some(name) });
    }

    pub fn activate_tab(&self, name: &str) -> bool {
        {
            let mut state = self.state.write();
            if !state.tabs.iter().any(|tab| tab.name == name) {
                return false;
            }
            for tab in &mut state.tabs {
                tab.active = tab.name == name;
            }
        }
        self.write_through();
        self.publish(WardenEvent::TabsChanged {
            active: Some(name.to_owned()),
        });
        true
    }

    /// 关闭标签页。关闭的是激活项时，激活其右侧邻居，没有则激活左侧邻居。
    pub fn close_tab(&self, name: &str) -> CloseTab {
        let active = {
            let mut state = self.state.write();
            let Some(index) = state.tabs.iter().position(|tab| tab.name == name) else {
                return CloseTab::NotFound;
            };
            if state.tabs[index].fixed || !state.tabs[index].deletable {
                return CloseTab::Protected;
            }
            let removed = state.tabs.remove(index);
            if removed.active && !state.tabs.is_empty() {
                let next = index.min(state.tabs.len() - 1);
                state.tabs[next].active = true;
            }
            state
                .tabs
                .iter()
                .find(|tab| tab.active)
                .map(|tab| tab.name.clone())
        };
        self.write_through();
        self.publish(WardenEvent::TabsChanged { active });
        CloseTab::Closed
    }

    /// 关闭除 `keep` 与受保护标签页之外的全部标签页，并激活 `keep`。返回关闭数量。
    pub fn close_other_tabs(&self, keep: &str) -> usize {
        let (closed, active) = {
            let mut state = self.state.write();
            let before = state.tabs.len();
            state
                .tabs
                .retain(|tab| tab.name == keep || tab.fixed || !tab.deletable);
            let closed = before - state.tabs.len();
            if state.tabs.iter().any(|tab| tab.name == keep) {
                for tab in &mut state.tabs {
                    tab.active = tab.name == keep;
                }
            }
            let active = state
                .tabs
                .iter()
                .find(|tab| tab.active)
                .map(|tab| tab.name.clone());
            (closed, active)
        };
        if closed > 0 {
            self.write_through();
            self.publish(WardenEvent::TabsChanged { active });
        }
        closed
    }

    /// 清空全部状态并删除持久化条目。
    pub fn reset(&self) -> Result<(), StorageError> {
        let epoch = {
            let mut epoch = self.epoch.lock();
            *epoch += 1;
            *self.state.write() = PermissionState::default();
            *epoch
        };
        tracing::info!(target: targets::PERMISSION, epoch, "permission state reset");
        self.publish(WardenEvent::RoutesChanged {
            dynamic_routes: 0,
            loaded: false,
        });
        self.publish(WardenEvent::SessionCleared);
        match &self.storage {
            Some(storage) => storage.remove(&self.key),
            None => Ok(()),
        }
    }

    pub fn persist(&self) -> Result<(), StorageError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let persisted = {
            let state = self.state.read();
            PersistedPermission {
                static_routes: state.static_routes.clone(),
                dynamic_routes: state.dynamic_routes.clone(),
                tabs: state.tabs.clone(),
            }
        };
        save_json(storage.as_ref(), &self.key, &persisted)?;
        tracing::debug!(target: targets::PERMISSION, key = %self.key, "permission state persisted");
        Ok(())
    }

    /// 从持久化存储恢复。返回是否找到条目。
    pub fn restore(&self) -> Result<bool, StorageError> {
        let Some(storage) = &self.storage else {
            return Ok(false);
        };
        let Some(persisted) = load_json::<PersistedPermission>(storage.as_ref(), &self.key)? else {
            return Ok(false);
        };
        *self.state.write() = PermissionState {
            static_routes: persisted.static_routes,
            dynamic_routes: persisted.dynamic_routes,
            is_dynamic_routes_loaded: false,
            tabs: persisted.tabs,
        };
        tracing::debug!(target: targets::PERMISSION, key = %self.key, "permission state restored");
        Ok(true)
    }

    fn write_through(&self) {
        if let Err(err) = self.persist() {
            tracing::warn!(
                target: targets::PERMISSION,
                key = %self.key,
                error = %err,
                "failed to persist permission state"
            );
        }
    }

    fn publish(&self, event: WardenEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

impl Default for PermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionStore")
            .field("state", &*self.state.read())
            .field("epoch", &self.epoch())
            .field("key", &self.key)
            .finish()
    }
}

fn menu_level(routes: &[RouteDescriptor]) -> Vec<RouteDescriptor> {
    let mut visible: Vec<RouteDescriptor> = routes
        .iter()
        .filter(|route| route.meta.is_visible())
        .map(|route| RouteDescriptor {
            children: menu_level(&route.children),
            ..route.clone()
        })
        .collect();
    visible.sort_by_key(|route| (route.meta.rank.is_none(), route.meta.rank));
    visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{MemoryStore, RouteMeta};

    fn tab(name: &str, fixed: bool) -> TabItem {
        TabItem {
            name: name.into(),
            path: format!("/{}", name.to_lowercase()),
            label: name.into(),
            active: false,
            icon: None,
            fixed,
            deletable: !fixed,
        }
    }

    fn ranked(name: &str, rank: Option<i32>, show: Option<bool>) -> RouteDescriptor {
        RouteDescriptor::new(name, format!("/{}", name.to_lowercase())).with_meta(RouteMeta {
            rank,
            show_link: show,
            ..RouteMeta::default()
        })
    }

    #[test]
    fn menu_tree_filters_hidden_and_sorts_by_rank() {
        let store = PermissionStore::new();
        store.set_static_routes(vec![ranked("Home", Some(0), None)]);
        store.set_dynamic_routes(vec![
            ranked("Unranked", None, None),
            ranked("Hidden", Some(1), Some(false)),
            ranked("System", Some(5), None)
                .with_child(ranked("Role", Some(2), None))
                .with_child(ranked("User", Some(1), None)),
            ranked("Reports", Some(3), None),
        ]);

        let menu = store.menu_tree();
        let names: Vec<_> = menu.iter().map(|route| route.name.as_str()).collect();
        assert_eq!(names, ["Home", "Reports", "System", "Unranked"]);
        let children: Vec<_> = menu[2].children.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(children, ["User", "Role"]);
        assert_eq!(store.all_routes().len(), 5);
    }

    #[test]
    fn tab_lifecycle_respects_protection() {
        let store = PermissionStore::new();
        store.open_tab(tab("Home", true));
        store.open_tab(tab("Users", false));
        store.open_tab(tab("Roles", false));
        assert_eq!(store.active_tab().unwrap().name, "Roles");

        assert_eq!(store.close_tab("Home"), CloseTab::Protected);
        assert_eq!(store.close_tab("Missing"), CloseTab::NotFound);
        assert_eq!(store.close_tab("Roles"), CloseTab::Closed);
        assert_eq!(store.active_tab().unwrap().name, "Users");

        store.open_tab(tab("Roles", false));
        assert!(store.activate_tab("Home"));
        assert_eq!(store.close_other_tabs("Users"), 1);
        let names: Vec<_> = store.tabs().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["Home", "Users"]);
        assert_eq!(store.active_tab().unwrap().name, "Users");
    }

    #[test]
    fn reopening_a_tab_does_not_duplicate_it() {
        let store = PermissionStore::new();
        store.open_tab(tab("Users", false));
        let mut moved = tab("Users", false);
        moved.path = "/users?page=2".into();
        store.open_tab(moved);
        assert_eq!(store.tabs().len(), 1);
        assert_eq!(store.tabs()[0].path, "/users?page=2");
    }

    #[test]
    fn loaded_flag_is_never_persisted() {
        let storage = Arc::new(MemoryStore::new());
        let store = PermissionStore::new().with_storage(storage.clone(), "acme");
        store.set_static_routes(vec![ranked("Home", None, None)]);
        store.set_dynamic_routes(vec![ranked("Reports", None, None)]);
        store.open_tab(tab("Home", true));
        store.set_loaded(true);
        store.persist().unwrap();

        let raw = storage.get("acme-permission").unwrap().unwrap();
        assert!(!raw.contains("Loaded"));

        let restored = PermissionStore::new().with_storage(storage.clone(), "acme");
        assert!(restored.restore().unwrap());
        let snapshot = restored.snapshot();
        assert!(!snapshot.is_dynamic_routes_loaded);
        assert_eq!(snapshot.dynamic_routes.len(), 1);
        assert_eq!(snapshot.tabs.len(), 1);

        restored.reset().unwrap();
        assert!(storage.get("acme-permission").unwrap().is_none());
        assert_eq!(restored.snapshot(), PermissionState::default());
    }

    #[tokio::test]
    async fn changes_are_broadcast() {
        let events = EventBus::new(8);
        let mut rx = events.subscribe();
        let store = PermissionStore::new().with_events(events);

        store.set_loaded(true);
        store.set_loaded(true);
        store.open_tab(tab("Home", true));

        assert_eq!(
            rx.recv().await.unwrap(),
            WardenEvent::RoutesChanged {
                dynamic_routes: 0,
                loaded: true
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            WardenEvent::TabsChanged {
                active: Some("Home".into())
            }
        );
    }

    #[test]
    fn tab_changes_are_written_through_to_storage() {
        let storage = Arc::new(MemoryStore::new());
        let store = PermissionStore::new().with_storage(storage.clone(), "acme");
        store.open_tab(tab("Home", true));
        store.open_tab(tab("Users", false));

        let fresh = PermissionStore::new().with_storage(storage.clone(), "acme");
        assert!(fresh.restore().unwrap());
        let names: Vec<_> = fresh.tabs().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["Home", "Users"]);
        assert_eq!(fresh.active_tab().unwrap().name, "Users");

        assert_eq!(store.close_tab("Users"), CloseTab::Closed);
        let fresh = PermissionStore::new().with_storage(storage, "acme");
        assert!(fresh.restore().unwrap());
        assert_eq!(fresh.tabs().len(), 1);
    }

    #[test]
    fn configured_directory_survives_a_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            prefix: "acme".into(),
            directory: Some(dir.path().to_path_buf()),
        };
        let store = PermissionStore::from_config(&config).unwrap();
        assert_eq!(store.storage_key(), "acme-permission");
        store.set_dynamic_routes(vec![ranked("Reports", None, None)]);
        assert!(dir.path().join("acme-permission.json").exists());

        let reopened = PermissionStore::from_config(&config).unwrap();
        assert!(reopened.restore().unwrap());
        assert_eq!(reopened.dynamic_routes().len(), 1);
        assert!(!reopened.is_loaded());
    }

    #[test]
    fn reset_advances_the_epoch_and_rejects_stale_writes() {
        let store = PermissionStore::new();
        let epoch = store.epoch();
        assert_eq!(store.within_epoch(epoch, || store.set_loaded(true)), Some(()));
        assert!(store.is_loaded());

        store.reset().unwrap();
        assert_eq!(store.epoch(), epoch + 1);
        assert_eq!(store.within_epoch(epoch, || store.set_loaded(true)), None);
        assert!(!store.is_loaded());
    }
}
