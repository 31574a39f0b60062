/// Pure command handlers mutating the race state.
pub mod commands;
/// Single-writer coordination of commands, persistence and broadcast.
pub mod coordinator;
/// Status and maintenance operations behind the debug routes.
pub mod debug_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Ordered background persistence of state snapshots.
pub mod persistence;
/// HTML results publication for finished races.
pub mod results;
/// WebSocket connection and message handling service.
pub mod websocket_service;
