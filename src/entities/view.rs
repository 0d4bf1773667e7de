// Views
// Thin wrappers over the shared module repository

use super::module::{CreateModuleInput, ModuleKind, SqlModule};
use crate::db::connection::Connection;
use crate::error::ProviderResult;

impl Connection {
    /// `input.body` starts at `AS`, e.g. `AS SELECT id FROM sales.orders`
    pub async fn create_view(&self, input: &CreateModuleInput) -> ProviderResult<SqlModule> {
        self.create_module(ModuleKind::View, input).await
    }

    pub async fn get_view_from_name(&self, schema: &str, name: &str) -> ProviderResult<Option<SqlModule>> {
        self.get_module_from_name(ModuleKind::View, schema, name).await
    }

    pub async fn get_view_from_id(&self, id: &str) -> ProviderResult<Option<SqlModule>> {
        self.get_module_from_id(ModuleKind::View, id).await
    }

    pub async fn update_view(&self, id: &str, body: &str) -> ProviderResult<SqlModule> {
        self.update_module(ModuleKind::View, id, body).await
    }

    pub async fn drop_view(&self, id: &str) -> ProviderResult<()> {
        self.drop_module(ModuleKind::View, id).await
    }
}
