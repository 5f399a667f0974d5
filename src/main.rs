use actix_web::{middleware::{Compress, NormalizePath, TrailingSlash}, web, App, HttpServer};
use tracing::{error, info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use ratedb::openapi::ApiDoc;
use ratedb::{config, cors, repo, AppConfig, AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let settings = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            eprintln!("Please copy .env.example to .env and configure it");
            std::process::exit(1);
        }
    };
    info!("Bootstrapping ratedb server");
    info!("Frontend URL: {}", settings.frontend_url.as_deref().unwrap_or("(none)"));

    let repo = repo::from_config(&settings).await.map_err(std::io::Error::other)?;
    let state = web::Data::new(AppState::new(&settings, repo).map_err(std::io::Error::other)?);
    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let frontend = settings.frontend_url.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(NormalizePath::new(TrailingSlash::Trim))
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors(frontend.as_deref()))
            .app_data(state.clone())
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&settings.bind_addr)?;

    info!("Listening on http://{}", settings.bind_addr);
    server.run().await
}
