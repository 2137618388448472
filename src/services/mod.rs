// 服务模块

pub mod prompt;
pub mod storage;
