//! HTTP front-end for the push dispatcher.
//!
//! Endpoints:
//! - `GET  /health`
//! - `POST /api/push/fcm`   Web Push / FCM subscriptions
//! - `POST /api/push/apns`  APNs binary gateway
//! - `POST /api/push/apns2` APNs HTTP/2 provider API

pub mod middleware;
pub mod routes;
pub mod state;
