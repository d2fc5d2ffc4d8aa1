//! 分层 Cookie 池：远程拉取、轮询分发、后台校验，以及转存用的会话 Cookie。

pub mod pool;
pub mod session;
pub mod source;
pub mod tier;
pub mod validator;
