#[macro_use]
extern crate rocket;

pub mod auth;
pub mod cache;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod mailbox;
pub mod models;
pub mod reprocess;
pub mod request_logger;
pub mod routes;
pub mod storage;
pub mod sync;

use crate::auth::{AuthConfig, AuthState, JwtService, PasswordService};
use crate::cache::ClassificationCache;
use crate::classify::OpenAiClient;
use crate::config::AppSettings;
use crate::db::TrackerDb;
use crate::mailbox::TokenStore;
use crate::request_logger::RequestLogger;
use crate::sync::dispatcher::SyncDispatcher;
use crate::sync::progress::ProgressHub;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let settings = AppSettings::from_env();

    // Configure CORS
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
            ]
            .into_iter()
            .map(From::from)
            .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    rocket::build()
        .attach(RequestLogger)
        .attach(TrackerDb::init())
        .attach(cors)
        .manage(settings)
        // Run database migrations on startup
        .attach(AdHoc::try_on_ignite(
            "Run Migrations",
            |rocket| async move {
                match TrackerDb::fetch(&rocket) {
                    Some(db) => {
                        let pool = (**db).clone();
                        match storage::run_migrations(&pool).await {
                            Ok(_) => {
                                log::info!("database migrations successful");
                                Ok(rocket)
                            }
                            Err(e) => {
                                log::error!("database migrations failed: {}", e);
                                Err(rocket)
                            }
                        }
                    }
                    None => {
                        log::error!("database pool not available for migrations");
                        Err(rocket)
                    }
                }
            },
        ))
        // Fairing to clone and manage the database pool for background tasks
        .attach(AdHoc::try_on_ignite(
            "Manage DB Pool and Pipeline Services",
            |rocket| async move {
                let pool = match TrackerDb::fetch(&rocket) {
                    Some(db) => (**db).clone(),
                    None => return Err(rocket),
                };

                let settings = rocket
                    .state::<AppSettings>()
                    .cloned()
                    .unwrap_or_else(AppSettings::from_env);

                let token_store = TokenStore::new(
                    settings.mailbox.token_dir.clone(),
                    settings.mailbox.token_path.clone(),
                    settings.mailbox.token_endpoint.clone(),
                );
                let cache = Arc::new(ClassificationCache::new());
                let hub = ProgressHub::new();

                Ok(rocket
                    .manage(pool)
                    .manage(token_store)
                    .manage(cache)
                    .manage(hub))
            },
        ))
        .attach(AdHoc::try_on_ignite("Init Auth State", |rocket| async move {
            let config = match AuthConfig::from_env() {
                Ok(config) => config,
                Err(err) => {
                    log::error!("failed to load auth config: {}", err);
                    return Err(rocket);
                }
            };

            let password_service = match PasswordService::new() {
                Ok(service) => service,
                Err(err) => {
                    log::error!("failed to initialize password service: {}", err);
                    return Err(rocket);
                }
            };

            let jwt_service = match JwtService::from_config(&config) {
                Ok(service) => service,
                Err(err) => {
                    log::error!("failed to initialize JWT service: {}", err);
                    return Err(rocket);
                }
            };

            Ok(rocket.manage(AuthState::new(config, password_service, jwt_service)))
        }))
        .attach(AdHoc::on_liftoff("OAuth State Janitor", |rocket| {
            Box::pin(async move {
                if let Some(pool) = rocket.state::<rocket_db_pools::sqlx::PgPool>() {
                    let janitor_pool = pool.clone();
                    tokio::spawn(async move {
                        let mut ticker =
                            tokio::time::interval(std::time::Duration::from_secs(3600));
                        loop {
                            ticker.tick().await;
                            match mailbox::oauth::purge_expired_states(&janitor_pool).await {
                                Ok(0) => {}
                                Ok(n) => log::info!("purged {} expired OAuth states", n),
                                Err(err) => {
                                    log::warn!("failed to purge expired OAuth states: {}", err)
                                }
                            }
                        }
                    });
                } else {
                    log::warn!("database pool unavailable; OAuth state janitor not started");
                }
            })
        }))
        // Spawn sync dispatcher in background
        .attach(AdHoc::on_liftoff("Spawn Sync Dispatcher", |rocket| {
            Box::pin(async move {
                let pool = rocket.state::<rocket_db_pools::sqlx::PgPool>().cloned();
                let settings = rocket.state::<AppSettings>().cloned();
                let cache = rocket.state::<Arc<ClassificationCache>>().cloned();
                let token_store = rocket.state::<TokenStore>().cloned();
                let hub = rocket.state::<ProgressHub>().cloned();

                match (pool, settings, cache, token_store, hub) {
                    (Some(pool), Some(settings), Some(cache), Some(token_store), Some(hub)) => {
                        let chat = Arc::new(OpenAiClient::new(
                            settings.classify.base_url.clone(),
                            settings.classify.api_key.clone(),
                            settings.classify.model.clone(),
                        ));
                        tokio::spawn(async move {
                            log::info!("starting sync dispatcher");
                            let dispatcher = SyncDispatcher::new(
                                pool,
                                settings,
                                cache,
                                chat,
                                token_store,
                                hub,
                            );
                            dispatcher.run().await
                        });
                    }
                    _ => {
                        log::error!(
                            "failed to spawn sync dispatcher: missing pool or pipeline services"
                        );
                    }
                }
            })
        }))
        .mount(
            "/api/v1",
            openapi_get_routes![
                // Health
                routes::health::live_health,
                routes::health::ready_health,
                // Auth
                auth::routes::register,
                auth::routes::login,
                auth::routes::me,
                // Applications
                routes::applications::list_applications,
                routes::applications::get_application,
                routes::applications::delete_application,
                // Sync
                routes::sync::start_sync,
                routes::sync::sync_state,
                routes::sync::cancel_sync,
                // Reprocess
                routes::reprocess::start_reprocess,
                routes::reprocess::reprocess_state,
                // Mailbox
                routes::mailbox::mailbox_auth,
                routes::mailbox::revoke_mailbox_token,
            ],
        )
        .mount(
            "/api/v1",
            routes![
                routes::sync::sync_stream,
                routes::mailbox::mailbox_oauth_callback,
            ],
        )
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Jobtrack API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::{self, PgPool};

    use crate::auth::{AuthConfig, AuthState, JwtService, PasswordService};
    use crate::config::AppSettings;
    use crate::mailbox::TokenStore;
    use crate::sync::progress::ProgressHub;

    pub use database::{TestDatabase, TestDatabaseError};

    /// Auth configuration with a fixed secret for integration tests.
    pub fn test_auth_state() -> AuthState {
        let config = AuthConfig {
            jwt_secret: "integration-test-secret-key".into(),
            jwt_ttl_minutes: 60,
            api_key: None,
            api_key_user_id: None,
        };
        let password_service = PasswordService::new().expect("password service");
        let jwt_service = JwtService::from_config(&config).expect("jwt service");
        AuthState::new(config, password_service, jwt_service)
    }

    /// Convenience helpers for seeding users and applications in tests.
    pub struct TestFixtures<'a> {
        pool: &'a PgPool,
    }

    impl<'a> TestFixtures<'a> {
        /// Create a fixture helper bound to the provided pool.
        pub fn new(pool: &'a PgPool) -> Self {
            Self { pool }
        }

        /// Insert a user row, returning the new user id.
        pub async fn insert_user(
            &self,
            email: &str,
            password_hash: Option<&str>,
        ) -> Result<i32, sqlx::Error> {
            sqlx::query_scalar(
                "INSERT INTO users (email, password_hash) VALUES (lower($1), $2) RETURNING id",
            )
            .bind(email)
            .bind(password_hash)
            .fetch_one(self.pool)
            .await
        }

        /// Issue a Bearer token for a user via the test auth state.
        pub fn bearer_token(&self, auth: &AuthState, user_id: i32, email: &str) -> String {
            let token = auth
                .jwt_service
                .issue_access_token(user_id, email)
                .expect("issue test token");
            format!("Bearer {}", token.token)
        }
    }

    pub mod database {
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::{GenericImage, ImageExt, core::WaitFor};
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database factory for integration tests.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            /// Provision a fresh database by launching a disposable Postgres
            /// container and running migrations against it.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let image = GenericImage::new("postgres", "16-alpine")
                    .with_wait_for(WaitFor::message_on_stdout(
                        "database system is ready to accept connections",
                    ))
                    .with_wait_for(WaitFor::message_on_stderr(
                        "database system is ready to accept connections",
                    ));

                let request = image
                    .with_env_var("POSTGRES_DB", "postgres")
                    .with_env_var("POSTGRES_USER", "postgres")
                    .with_env_var("POSTGRES_PASSWORD", "postgres");

                let container = request.start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                let base_options: PgConnectOptions =
                    admin_url.parse().map_err(TestDatabaseError::Sqlx)?;
                let base_options = base_options.log_statements(log::LevelFilter::Off);

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let new_db_name = format!("jobtrack_{}", Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql)
                    .execute(&admin_pool)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.clone().database(&new_db_name))
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container: Some(container),
                })
            }

            /// Connection pool for use in tests and Rocket state.
            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            /// Convenience method returning a clone of the pooled handle.
            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database(self.admin_options.clone(), &self.database_name)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_sql = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", database_name);
            sqlx::query(&drop_sql).execute(&admin_pool).await?;
            Ok(())
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ = drop_database(admin_options, &db_name).await;
                        });
                    } else {
                        std::thread::spawn(move || {
                            if let Ok(rt) = tokio::runtime::Runtime::new() {
                                rt.block_on(async move {
                                    pool.close().await;
                                    let _ = drop_database(admin_options, &db_name).await;
                                });
                            }
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        pg_pool: Option<PgPool>,
        auth_state: Option<AuthState>,
        settings: Option<AppSettings>,
        token_store: Option<TokenStore>,
        hub: Option<ProgressHub>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                pg_pool: None,
                auth_state: None,
                settings: None,
                token_store: None,
                hub: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Manage a `PgPool` instance for tests that exercise database-backed routes.
        pub fn manage_pg_pool(mut self, pool: PgPool) -> Self {
            self.pg_pool = Some(pool);
            self
        }

        pub fn manage_auth_state(mut self, auth_state: AuthState) -> Self {
            self.auth_state = Some(auth_state);
            self
        }

        pub fn manage_settings(mut self, settings: AppSettings) -> Self {
            self.settings = Some(settings);
            self
        }

        pub fn manage_token_store(mut self, token_store: TokenStore) -> Self {
            self.token_store = Some(token_store);
            self
        }

        pub fn manage_progress_hub(mut self, hub: ProgressHub) -> Self {
            self.hub = Some(hub);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(pool) = self.pg_pool {
                rocket = rocket.manage(pool);
            }
            if let Some(auth_state) = self.auth_state {
                rocket = rocket.manage(auth_state);
            }
            if let Some(settings) = self.settings {
                rocket = rocket.manage(settings);
            }
            if let Some(token_store) = self.token_store {
                rocket = rocket.manage(token_store);
            }
            if let Some(hub) = self.hub {
                rocket = rocket.manage(hub);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
