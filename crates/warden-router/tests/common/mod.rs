#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use warden_core::{
    CoreError, MemoryCredentials, RouteDescriptor, RouteSource, RoutesConfig, SystemClock, codes,
};
use warden_router::{
    DynamicRouteInitializer, LoadingIndicator, NavigationGuard, PermissionStore, RouteOrigin,
    RouteRegistry, RouterEngine, transform,
};

/// 脚本中的一步。
#[derive(Clone, Debug)]
pub enum Step {
    Routes(Vec<RouteDescriptor>),
    Fail(&'static str),
}

/// 按脚本返回结果的路由来源，脚本耗尽后重复 `fallback`。
pub struct ScriptedSource {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    latency: Duration,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Self::with_latency(script, fallback, Duration::ZERO)
    }

    pub fn with_latency(script: Vec<Step>, fallback: Step, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            latency,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn serving(routes: Vec<RouteDescriptor>) -> Arc<Self> {
        Self::new(Vec::new(), Step::Routes(routes))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteSource for ScriptedSource {
    async fn fetch_routes(&self) -> warden_core::Result<Vec<RouteDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Routes(routes) => Ok(routes),
            Step::Fail(code) => Err(CoreError::new(code, format!("scripted failure: {code}"))),
        }
    }
}

/// 记录点亮与熄灭次数的指示器。
#[derive(Default)]
pub struct CountingIndicator {
    pub started: AtomicUsize,
    pub done: AtomicUsize,
}

impl LoadingIndicator for CountingIndicator {
    fn start(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        self.done.fetch_add(1, Ordering::SeqCst);
    }
}

/// 后端下发的两条授权路由。
pub fn backend_routes() -> Vec<RouteDescriptor> {
    vec![
        RouteDescriptor::new("Reports", "/reports").with_component("reports/index"),
        RouteDescriptor::new("Admin", "/admin")
            .with_component("Layout")
            .with_roles(["admin"])
            .with_child(RouteDescriptor::new("AdminUsers", "users").with_component("admin/users")),
    ]
}

pub fn static_routes() -> Vec<RouteDescriptor> {
    vec![
        RouteDescriptor::new("Login", "/login").with_component("login"),
        RouteDescriptor::new("Welcome", "/welcome").with_component("welcome"),
    ]
}

/// 一套互相连通的服务。
pub struct Harness {
    pub credentials: Arc<MemoryCredentials>,
    pub permissions: Arc<PermissionStore>,
    pub registry: Arc<RouteRegistry>,
    pub source: Arc<ScriptedSource>,
    pub initializer: DynamicRouteInitializer,
}

impl Harness {
    pub fn new(source: Arc<ScriptedSource>, credentials: MemoryCredentials) -> Self {
        let credentials = Arc::new(credentials);
        let permissions = Arc::new(PermissionStore::new());
        let registry = Arc::new(RouteRegistry::new());
        registry.register_batch(&transform(&static_routes()).routes, RouteOrigin::Static);

        let initializer = DynamicRouteInitializer::new(
            Arc::clone(&source) as Arc<dyn RouteSource>,
            Arc::clone(&credentials) as _,
            Arc::clone(&permissions),
            Arc::clone(&registry) as Arc<dyn RouterEngine>,
            Arc::new(SystemClock),
        );
        Self {
            credentials,
            permissions,
            registry,
            source,
            initializer,
        }
    }

    pub fn signed_in(source: Arc<ScriptedSource>, roles: &[&str]) -> Self {
        Self::new(
            source,
            MemoryCredentials::authenticated("token-1", "user-1", roles.iter().copied()),
        )
    }

    pub fn guard(&self) -> NavigationGuard {
        NavigationGuard::new(
            RoutesConfig::default(),
            Arc::clone(&self.credentials) as _,
            Arc::clone(&self.registry) as _,
            self.initializer.clone(),
            Arc::new(SystemClock),
        )
        .with_static_routes(static_routes())
    }
}

pub const SERVER_DOWN: &str = codes::HTTP_SERVER;
