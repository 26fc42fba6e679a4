pub mod db_utils;
pub mod org_code_registry;
pub mod pagination;
