// Tablelog Kernel
//
// Row-level change capture into append-only log relations, and
// point-in-time restore of a table by replaying its log forward or
// backward.

pub mod quote;
pub mod ident;
pub mod catalog;
pub mod statement;
pub mod backend;
pub mod log;
pub mod partition;
pub mod keys;
pub mod capture;
pub mod restore;
pub mod replay;
pub mod memory;
