// Functions
// Scalar, inline and multi-statement table-valued functions

use super::module::{CreateModuleInput, ModuleKind, SqlModule};
use crate::db::connection::Connection;
use crate::error::ProviderResult;

impl Connection {
    pub async fn create_function(&self, input: &CreateModuleInput) -> ProviderResult<SqlModule> {
        self.create_module(ModuleKind::Function, input).await
    }

    pub async fn get_function_from_name(&self, schema: &str, name: &str) -> ProviderResult<Option<SqlModule>> {
        self.get_module_from_name(ModuleKind::Function, schema, name).await
    }

    pub async fn get_function_from_id(&self, id: &str) -> ProviderResult<Option<SqlModule>> {
        self.get_module_from_id(ModuleKind::Function, id).await
    }

    pub async fn update_function(&self, id: &str, body: &str) -> ProviderResult<SqlModule> {
        self.update_module(ModuleKind::Function, id, body).await
    }

    pub async fn drop_function(&self, id: &str) -> ProviderResult<()> {
        self.drop_module(ModuleKind::Function, id).await
    }
}
