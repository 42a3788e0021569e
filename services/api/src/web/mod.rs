pub mod auth;
pub mod middleware;
pub mod photos;
pub mod phrase_cards;
pub mod protocol;
pub mod reports;
pub mod rest;
pub mod state;
#[cfg(test)]
mod test_support;
pub mod turn_task;
pub mod ws_handler;

// Re-export the main WebSocket handler to make it easily accessible
// to the binary that will build the web server router.
pub use middleware::require_auth;
pub use ws_handler::ws_handler;
