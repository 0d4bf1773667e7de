// Database Drivers
// tiberius over bb8 for SQL Server, Azure SQL, Synapse and Fabric endpoints

pub mod mssql;

pub use mssql::{MssqlAuth, MssqlDialer, MssqlHandle, MssqlPool, SQL_TOKEN_RESOURCE};
