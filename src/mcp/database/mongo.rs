//! `mongodb` driver implementation of the database seam.
//!
//! The client always targets `127.0.0.1:<local_port>` with
//! `directConnection=true`: the driver must not try to discover replica-set
//! members by their internal hostnames, which are unreachable from here.

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::{ClientOptions, Credential, ServerAddress};
use mongodb::Client;
use tracing::{debug, info};

use crate::mcp::config::DatabaseSettings;
use crate::mcp::error::SessionError;
use crate::mcp::secrets::DatabaseCredentials;

use super::{
    AggregateBatch, CollectionStatistics, DatabaseClient, DatabaseConnector, DatabaseInfo,
    FindRequest,
};

const APP_NAME: &str = "mongo-tunnel-mcp";

/// Server error codes reported for malformed queries.
const BAD_VALUE: i32 = 2;
const FAILED_TO_PARSE: i32 = 9;
const UNAUTHORIZED: i32 = 13;
const AUTHENTICATION_FAILED: i32 = 18;

/// Map a driver error onto the session error taxonomy.
pub(crate) fn map_driver_error(error: MongoError) -> SessionError {
    match error.kind.as_ref() {
        ErrorKind::Authentication { message, .. } => SessionError::DatabaseAuth(message.clone()),
        ErrorKind::ServerSelection { message, .. } => SessionError::Network(message.clone()),
        ErrorKind::Io(io) => SessionError::Network(io.to_string()),
        ErrorKind::ConnectionPoolCleared { message, .. } => {
            SessionError::Network(message.clone())
        }
        ErrorKind::Command(command) => match command.code {
            BAD_VALUE | FAILED_TO_PARSE => SessionError::Query(command.message.clone()),
            UNAUTHORIZED | AUTHENTICATION_FAILED => {
                SessionError::DatabaseAuth(command.message.clone())
            }
            _ => SessionError::Database(format!(
                "{} ({}): {}",
                command.code_name, command.code, command.message
            )),
        },
        ErrorKind::InvalidArgument { message, .. } => SessionError::Query(message.clone()),
        _ => SessionError::Database(error.to_string()),
    }
}

fn client_options(
    local_port: u16,
    settings: &DatabaseSettings,
    credentials: &DatabaseCredentials,
) -> Result<ClientOptions, SessionError> {
    let address = ServerAddress::parse(format!("127.0.0.1:{}", local_port))
        .map_err(|e| SessionError::Configuration(e.to_string()))?;

    let mut credential = Credential::default();
    credential.username = Some(credentials.username.clone());
    credential.password = Some(credentials.password.clone());
    credential.source = Some(settings.auth_source.clone());

    let mut options = ClientOptions::default();
    options.hosts = vec![address];
    options.credential = Some(credential);
    options.direct_connection = Some(true);
    options.repl_set_name = settings.replica_set.clone();
    options.connect_timeout = Some(settings.connect_timeout);
    options.server_selection_timeout = Some(settings.server_selection_timeout);
    options.max_pool_size = Some(settings.max_pool_size);
    options.app_name = Some(APP_NAME.to_string());
    Ok(options)
}

/// Production [`DatabaseConnector`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MongoConnector;

impl MongoConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseConnector for MongoConnector {
    async fn connect(
        &self,
        local_port: u16,
        settings: &DatabaseSettings,
        credentials: &DatabaseCredentials,
    ) -> Result<Arc<dyn DatabaseClient>, SessionError> {
        let options = client_options(local_port, settings, credentials)?;
        let client = Client::with_options(options).map_err(map_driver_error)?;

        // The driver connects lazily; ping forces selection and authentication
        let admin = client.database("admin");
        admin
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(map_driver_error)?;

        let build_info = admin
            .run_command(doc! { "buildInfo": 1 })
            .await
            .map_err(map_driver_error)?;
        let server_version = build_info
            .get_str("version")
            .unwrap_or("unknown")
            .to_string();

        info!(
            "Authenticated to MongoDB {} through 127.0.0.1:{} as {} (auth source {})",
            server_version, local_port, credentials.username, settings.auth_source
        );

        Ok(Arc::new(MongoDatabaseClient {
            client,
            server_version,
        }))
    }
}

struct MongoDatabaseClient {
    client: Client,
    server_version: String,
}

#[async_trait]
impl DatabaseClient for MongoDatabaseClient {
    fn server_version(&self) -> &str {
        &self.server_version
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, SessionError> {
        let databases = self
            .client
            .list_databases()
            .await
            .map_err(map_driver_error)?;

        Ok(databases
            .into_iter()
            .map(|spec| DatabaseInfo {
                name: spec.name,
                size_on_disk: spec.size_on_disk,
                empty: spec.empty,
            })
            .collect())
    }

    async fn list_database_names(&self) -> Result<Vec<String>, SessionError> {
        self.client
            .list_database_names()
            .await
            .map_err(map_driver_error)
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>, SessionError> {
        self.client
            .database(database)
            .list_collection_names()
            .await
            .map_err(map_driver_error)
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        request: FindRequest,
    ) -> Result<Vec<Document>, SessionError> {
        let FindRequest {
            filter,
            projection,
            sort,
            limit,
        } = request;
        debug!(
            "find on {}.{} with limit {}: {}",
            database, collection, limit, filter
        );

        let collection = self
            .client
            .database(database)
            .collection::<Document>(collection);
        let mut find = collection.find(filter).limit(i64::from(limit));
        if let Some(projection) = projection {
            find = find.projection(projection);
        }
        if let Some(sort) = sort {
            find = find.sort(sort);
        }

        let cursor = find.await.map_err(map_driver_error)?;
        cursor.try_collect().await.map_err(map_driver_error)
    }

    async fn count_documents(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> Result<u64, SessionError> {
        let collection = self
            .client
            .database(database)
            .collection::<Document>(collection);
        let counted = if filter.is_empty() {
            collection.estimated_document_count().await
        } else {
            collection.count_documents(filter).await
        };
        counted.map_err(map_driver_error)
    }

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: Vec<Document>,
        limit: u32,
    ) -> Result<AggregateBatch, SessionError> {
        let collection = self
            .client
            .database(database)
            .collection::<Document>(collection);
        let mut cursor = collection
            .aggregate(pipeline)
            .batch_size(limit.saturating_add(1))
            .await
            .map_err(map_driver_error)?;

        let mut batch = AggregateBatch::default();
        while let Some(document) = cursor.try_next().await.map_err(map_driver_error)? {
            if batch.documents.len() >= limit as usize {
                batch.truncated = true;
                break;
            }
            batch.documents.push(document);
        }
        Ok(batch)
    }

    async fn collection_stats(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<CollectionStatistics, SessionError> {
        let stats = self
            .client
            .database(database)
            .run_command(doc! { "collStats": collection })
            .await
            .map_err(map_driver_error)?;
        Ok(statistics_from_document(&stats))
    }

    async fn shutdown(&self) {
        self.client.clone().shutdown().await;
    }
}

/// `collStats` numbers come back as int32, int64 or double depending on
/// size and server version.
fn number(document: &Document, key: &str) -> Option<f64> {
    match document.get(key)? {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn count(document: &Document, key: &str) -> u64 {
    number(document, key)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n as u64)
        .unwrap_or(0)
}

fn statistics_from_document(stats: &Document) -> CollectionStatistics {
    CollectionStatistics {
        document_count: count(stats, "count"),
        size_bytes: count(stats, "size"),
        storage_size_bytes: count(stats, "storageSize"),
        index_count: count(stats, "nindexes"),
        total_index_size_bytes: count(stats, "totalIndexSize"),
        avg_document_size_bytes: number(stats, "avgObjSize").unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> DatabaseSettings {
        DatabaseSettings {
            auth_source: "admin".into(),
            replica_set: Some("rs0".into()),
            connect_timeout: Duration::from_millis(1500),
            server_selection_timeout: Duration::from_millis(2500),
            max_pool_size: 5,
        }
    }

    fn credentials() -> DatabaseCredentials {
        DatabaseCredentials {
            username: "reader".into(),
            password: "pw".into(),
        }
    }

    #[test]
    fn test_client_options_target_local_port_directly() {
        let options = client_options(40123, &settings(), &credentials()).unwrap();
        assert_eq!(options.hosts.len(), 1);
        assert_eq!(options.hosts[0].to_string(), "127.0.0.1:40123");
        assert_eq!(options.direct_connection, Some(true));
        assert_eq!(options.repl_set_name.as_deref(), Some("rs0"));
        assert_eq!(options.max_pool_size, Some(5));
        assert_eq!(options.connect_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(
            options.server_selection_timeout,
            Some(Duration::from_millis(2500))
        );

        let credential = options.credential.unwrap();
        assert_eq!(credential.username.as_deref(), Some("reader"));
        assert_eq!(credential.source.as_deref(), Some("admin"));
    }

    #[test]
    fn test_statistics_accept_mixed_number_types() {
        let stats = statistics_from_document(&doc! {
            "count": 1200_i32,
            "size": 4_800_000_i64,
            "storageSize": 2_097_152.0_f64,
            "nindexes": 3_i32,
            "totalIndexSize": 98_304_i64,
            "avgObjSize": 4000_i32,
        });
        assert_eq!(
            stats,
            CollectionStatistics {
                document_count: 1200,
                size_bytes: 4_800_000,
                storage_size_bytes: 2_097_152,
                index_count: 3,
                total_index_size_bytes: 98_304,
                avg_document_size_bytes: 4000.0,
            }
        );
    }

    #[test]
    fn test_statistics_missing_fields_are_zero() {
        let stats = statistics_from_document(&doc! { "ns": "shop.orders" });
        assert_eq!(stats, CollectionStatistics::default());
    }
}
