pub mod disk_routes;
pub mod notification_routes;
pub mod static_routes;
