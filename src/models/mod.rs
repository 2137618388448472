// 数据模型模块

pub mod catalog;
pub mod error;
pub mod fields;
pub mod index;

pub use catalog::{Catalog, Group, HostRecord, LogMode, Options, Proxy};
pub use error::CatalogError;
