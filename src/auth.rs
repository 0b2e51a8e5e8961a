//! 账号与个人资料
//!
//! 注册 / 登录 / 登出，登录结果写入 `SessionContext`（同时落盘到键值存储）。
//! 所有失败都以一次性提示通知界面层，并返回错误。

use std::sync::Arc;

use crate::api::RemoteApi;
use crate::error::{Alert, ClientError};
use crate::events::{AppEvent, EventBus, Screen};
use crate::models::{User, clean_id};
use crate::session::{SessionContext, SessionIdentity};

pub struct Auth {
    api: Arc<dyn RemoteApi>,
    session: Arc<SessionContext>,
    events: EventBus,
}

fn require_filled(fields: &[&str]) -> Result<(), ClientError> {
    if fields.iter().any(|f| f.trim().is_empty()) {
        Err(ClientError::precondition("Please fill all fields"))
    } else {
        Ok(())
    }
}

impl Auth {
    pub fn new(api: Arc<dyn RemoteApi>, session: Arc<SessionContext>, events: EventBus) -> Self {
        Self {
            api,
            session,
            events,
        }
    }

    fn fail<T>(&self, err: ClientError) -> Result<T, ClientError> {
        tracing::warn!("[Auth] {}", err);
        self.events.alert(err.to_alert("Error"));
        Err(err)
    }

    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<(), ClientError> {
        if let Err(e) = require_filled(&[username, email, password]) {
            return self.fail(e);
        }
        match self.api.register(username, email, password).await {
            Ok(()) => {
                tracing::info!("[Auth] 注册成功: {}", username);
                self.events
                    .alert(Alert::success("Success", "User registered successfully!"));
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    /// 登录并写入会话，跳转首页
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionIdentity, ClientError> {
        if let Err(e) = require_filled(&[email, password]) {
            return self.fail(e);
        }
        let user = match self.api.login(email, password).await {
            Ok(user) => user,
            Err(e) => return self.fail(e),
        };

        let identity = SessionIdentity {
            user_id: clean_id(&user.id),
            username: user.username,
        };
        if let Err(e) = self.session.sign_in(identity.clone()) {
            return self.fail(e.into());
        }

        self.events.alert(Alert::success(
            "Success",
            format!("Welcome back, {}!", identity.username),
        ));
        self.events.emit(AppEvent::Navigate {
            screen: Screen::Home,
        });
        Ok(identity)
    }

    /// 登出：远端成功后才清除本地会话
    pub async fn logout(&self) -> Result<(), ClientError> {
        if let Err(e) = self.api.logout().await {
            return self.fail(e);
        }
        if let Err(e) = self.session.sign_out() {
            return self.fail(e.into());
        }
        self.events.emit(AppEvent::Navigate {
            screen: Screen::Login,
        });
        Ok(())
    }

    pub async fn fetch_profile(&self) -> Result<User, ClientError> {
        let Some(user_id) = self.session.user_id() else {
            return self.fail(ClientError::precondition(
                "User info not loaded yet. Please wait a moment.",
            ));
        };
        match self.api.get_user(&user_id).await {
            Ok(user) => Ok(user),
            Err(e) => self.fail(e),
        }
    }

    /// 更新用户名 / 邮箱，同步刷新会话中的用户名
    pub async fn update_profile(&self, username: &str, email: &str) -> Result<User, ClientError> {
        let Some(user_id) = self.session.user_id() else {
            return self.fail(ClientError::precondition(
                "User info not loaded yet. Please wait a moment.",
            ));
        };
        if let Err(e) = require_filled(&[username, email]) {
            return self.fail(e);
        }

        let user = match self.api.update_profile(&user_id, username, email).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!("[Auth] 更新资料失败: {}", e);
                self.events
                    .alert(Alert::error("Error", "Failed to update profile"));
                return Err(e);
            }
        };

        if let Err(e) = self.session.sign_in(SessionIdentity {
            user_id,
            username: user.username.clone(),
        }) {
            tracing::warn!("[Auth] 写入会话失败: {}", e);
        }
        self.events
            .alert(Alert::success("Success", "Profile updated!"));
        Ok(user)
    }
}
