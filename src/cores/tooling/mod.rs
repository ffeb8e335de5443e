pub mod catalog;
pub mod invoker;
pub mod templates;
#[cfg(test)]
pub mod testing;

pub use catalog::{ToolBinary, ToolCatalog};
pub use invoker::{ProcessInvoker, ToolInvoker, ToolOutput};
pub use templates::{TemplateVars, ToolSpec, ToolTemplates};
