// Stored Procedures

use super::module::{CreateModuleInput, ModuleKind, SqlModule};
use crate::db::connection::Connection;
use crate::error::ProviderResult;

impl Connection {
    pub async fn create_procedure(&self, input: &CreateModuleInput) -> ProviderResult<SqlModule> {
        self.create_module(ModuleKind::Procedure, input).await
    }

    pub async fn get_procedure_from_name(&self, schema: &str, name: &str) -> ProviderResult<Option<SqlModule>> {
        self.get_module_from_name(ModuleKind::Procedure, schema, name).await
    }

    pub async fn get_procedure_from_id(&self, id: &str) -> ProviderResult<Option<SqlModule>> {
        self.get_module_from_id(ModuleKind::Procedure, id).await
    }

    pub async fn update_procedure(&self, id: &str, body: &str) -> ProviderResult<SqlModule> {
        self.update_module(ModuleKind::Procedure, id, body).await
    }

    pub async fn drop_procedure(&self, id: &str) -> ProviderResult<()> {
        self.drop_module(ModuleKind::Procedure, id).await
    }
}
