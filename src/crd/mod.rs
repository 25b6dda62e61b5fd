//! Custom Resource Definitions for the cloud resource operator.

mod cloud_resource;
mod cloud_status;
mod cloud_template;
mod types;

pub use cloud_resource::{CloudResource, CloudResourceSpec};
pub use cloud_status::{CloudStatus, CloudStatusSpec};
pub use cloud_template::{CloudTemplate, CloudTemplateSpec, CloudTemplateStatus};
pub use types::*;
