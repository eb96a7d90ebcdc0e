/*!
Process entry point: logging, configuration, schema check, router, serve.
*/
use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use tokio::sync::RwLock;

use ecole::config;
use ecole::inter;

static DEFAULT_CONFIG: &str = "ecole.toml";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("ecole")
        .build();
    TermLogger::init(
        ecole::log_level_from_env(),
        log_cfg,
        TerminalMode::Stdout,
        ColorChoice::Auto
    ).unwrap();
    log::info!("Logging started.");

    let config_path = std::env::args().nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_owned());
    let glob = match config::load_configuration(&config_path).await {
        Ok(glob) => glob,
        Err(e) => {
            log::error!("Unable to start: {}", &e);
            std::process::exit(1);
        },
    };
    let addr = glob.addr;
    let glob = Arc::new(RwLock::new(glob));

    let app = Router::new()
        .route(
            "/users",
            get(inter::users::list_users).post(inter::users::create_user),
        )
        .route(
            "/users/:id",
            get(inter::users::get_user)
                .put(inter::users::update_user)
                .delete(inter::users::delete_user),
        )
        .route(
            "/users/:id/parents",
            get(inter::users::list_parents).post(inter::users::link_parent),
        )
        .route(
            "/users/:id/parents/:parent",
            axum::routing::delete(inter::users::unlink_parent),
        )
        .route(
            "/lessons",
            get(inter::lessons::list_lessons).post(inter::lessons::create_lesson),
        )
        .route(
            "/lessons/:id",
            get(inter::lessons::get_lesson)
                .put(inter::lessons::update_lesson)
                .delete(inter::lessons::delete_lesson),
        )
        .route(
            "/subjects",
            get(inter::lessons::list_subjects).post(inter::lessons::create_subject),
        )
        .route("/hooks/identity", post(inter::webhook::identity_webhook))
        .layer(Extension(glob));

    log::info!("Listening on {}", &addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            log::error!("Unable to bind {}: {}", &addr, &e);
            std::process::exit(1);
        },
    };
    axum::serve(listener, app).await.unwrap();
}
