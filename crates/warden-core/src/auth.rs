use parking_lot::RwLock;

/// 认证上下文的存取契约。
///
/// # 契约说明（What）
/// - `token`/`user_id` 任一缺失即视为“未认证”，动态路由初始化器会直接返回不可重试错误；
/// - `roles` 返回当前用户持有的角色集合，导航守卫用于与路由要求求交集；
/// - `clear` 必须幂等，导航守卫在不可重试失败与登出路径上都会调用。
pub trait CredentialStore: Send + Sync + 'static {
    /// 当前访问令牌。
    fn token(&self) -> Option<String>;

    /// 当前用户标识。
    fn user_id(&self) -> Option<String>;

    /// 当前用户持有的角色。
    fn roles(&self) -> Vec<String>;

    /// 清空认证上下文。
    fn clear(&self);
}

/// 基于读写锁的内存实现。
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    inner: RwLock<Option<Session>>,
}

#[derive(Clone, Debug)]
struct Session {
    token: String,
    user_id: String,
    roles: Vec<String>,
}

impl MemoryCredentials {
    /// 创建未认证的存储。
    pub fn new() -> Self {
        Self::default()
    }

    /// 以完整会话信息创建存储。
    pub fn authenticated<I, S>(token: impl Into<String>, user_id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        store.sign_in(token, user_id, roles);
        store
    }

    /// 登录成功后写入会话。
    pub fn sign_in<I, S>(&self, token: impl Into<String>, user_id: impl Into<String>, roles: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.inner.write() = Some(Session {
            token: token.into(),
            user_id: user_id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        });
    }
}

impl CredentialStore for MemoryCredentials {
    fn token(&self) -> Option<String> {
        self.inner
            .read()
            .as_ref()
            .map(|session| session.token.clone())
            .filter(|token| !token.is_empty())
    }

    fn user_id(&self) -> Option<String> {
        self.inner
            .read()
            .as_ref()
            .map(|session| session.user_id.clone())
            .filter(|id| !id.is_empty())
    }

    fn roles(&self) -> Vec<String> {
        self.inner
            .read()
            .as_ref()
            .map(|session| session.roles.clone())
            .unwrap_or_default()
    }

    fn clear(&self) {
        self.inner.write().take();
    }
}
