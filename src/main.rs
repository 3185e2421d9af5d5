pub mod auth;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod err;
pub mod io;
pub mod ledger;
pub mod models;
pub mod verify;

use std::sync::Arc;

use anyhow::anyhow;
use axum::handler::Handler;
use axum::http::Uri;
use axum::response::IntoResponse;
use axum::{routing::get, routing::post, Extension, Router};
use serde::Serialize;

use crate::config::Config;
use crate::err::{Error, Fine, Maybe, Nothing};
use crate::io::ImageStore;
use crate::verify::{CommandModel, FaceVerifier};

pub type Payload<T> = Result<Maybe<T>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Fine(value))
}

pub fn breaks<V>(err: Error) -> Payload<V>
where
    V: Serialize,
{
    Ok(Nothing(err))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_env();

    let pool = db::connect(&config.database_url).await?;
    let store = ImageStore::open(&config.data_dir)
        .await
        .map_err(|err| anyhow!("preparing data dir: {:?}", err))?;
    let verifier = Arc::new(FaceVerifier::new(
        CommandModel::new(config.verify_command.clone()),
        config.verify_timeout,
    ));

    let app = Router::new()
        .route("/student/register", post(auth::register_student))
        .route("/student/login", post(auth::login_student))
        .route("/student/logout", post(auth::logout_student))
        .route("/checkin", post(ledger::submit_check_in))
        .route("/lectures", get(dashboard::list_lectures))
        .route(
            "/lectures/:lecture/attendance",
            get(dashboard::list_attendance),
        )
        .layer(Extension(pool))
        .layer(Extension(store))
        .layer(Extension(verifier))
        .fallback(err::handler404.into_service());

    log::info!("Starting attendance server on http://{}", config.bind);
    axum::Server::bind(&config.bind)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
