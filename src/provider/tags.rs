//! Tag key constants written onto every stack this controller manages.
//! All prefixed `resources.appvia.io/` per the original convention.

pub const PREFIX: &str = "resources.appvia.io";

pub const CREATED: &str = "resources.appvia.io/created";
pub const CHECKSUM: &str = "resources.appvia.io/checksum";
pub const DELETION_TIME: &str = "resources.appvia.io/removal";
pub const NAMESPACE: &str = "resources.appvia.io/namespace";
pub const PROVIDER_NAME: &str = "resources.appvia.io/provider";
pub const RESOURCE_NAME: &str = "resources.appvia.io/resource";
pub const RETENTION: &str = "resources.appvia.io/retention";
pub const TEMPLATE_NAME: &str = "resources.appvia.io/template";
