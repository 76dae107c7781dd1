//! # API Route Configuration
//!
//! This module sets up all the HTTP routes for the API.

use actix_web::web;

use super::handlers;

/// Configure all API routes.
///
/// This function is called from main.rs to set up
/// all the endpoint routes.
///
/// ## Route Structure
///
/// ```text
/// /
/// ├── /health                     GET  - Health check
/// ├── /network/stats              GET  - Circulation stats
/// ├── /wallet
/// │   ├── /create                 POST - Create wallet
/// │   ├── /balance/{user}         GET  - Balance snapshot
/// │   ├── /transfer               POST - Peer-to-peer send
/// │   ├── /exchange               POST - Unlock earned balance
/// │   └── /transactions/{user}    GET  - Transaction history
/// ├── /mining
/// │   ├── /start                  POST - Open session
/// │   ├── /stop                   POST - Close session
/// │   └── /status/{user}          GET  - Session status
/// ├── /referrals
/// │   ├── ""                      POST - Record referral
/// │   └── /complete               POST - Mark referee qualified
/// ├── /rewards
/// │   ├── /referral/claim         POST - Pay referral bonus
/// │   └── /task/claim             POST - Pay task bonus
/// └── /admin
///     ├── /reconcile/{user}       POST - Audit one wallet
///     └── /wallet/{user}/lock     POST - Freeze/unfreeze
/// ```
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint - API information
        .route("/", web::get().to(handlers::api_info))
        // Health check endpoint
        .route("/health", web::get().to(handlers::health_check))
        // Circulation stats
        .route("/network/stats", web::get().to(handlers::network_stats))
        // Wallet endpoints
        .service(
            web::scope("/wallet")
                .route("/create", web::post().to(handlers::create_wallet))
                .route("/balance/{user}", web::get().to(handlers::get_balance))
                .route("/transfer", web::post().to(handlers::transfer))
                .route("/exchange", web::post().to(handlers::exchange))
                .route(
                    "/transactions/{user}",
                    web::get().to(handlers::get_transactions),
                ),
        )
        // Mining endpoints
        .service(
            web::scope("/mining")
                .route("/start", web::post().to(handlers::start_mining))
                .route("/stop", web::post().to(handlers::stop_mining))
                .route("/status/{user}", web::get().to(handlers::mining_status)),
        )
        // Referral lifecycle (driven by the product's referral system)
        .service(
            web::scope("/referrals")
                .route("", web::post().to(handlers::record_referral))
                .route("/complete", web::post().to(handlers::complete_referral)),
        )
        // Reward claims
        .service(
            web::scope("/rewards")
                .route(
                    "/referral/claim",
                    web::post().to(handlers::claim_referral_reward),
                )
                .route("/task/claim", web::post().to(handlers::claim_task_reward)),
        )
        // Administrative endpoints
        .service(
            web::scope("/admin")
                .route("/reconcile/{user}", web::post().to(handlers::reconcile))
                .route(
                    "/wallet/{user}/lock",
                    web::post().to(handlers::set_wallet_lock),
                ),
        );
}
