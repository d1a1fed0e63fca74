//! Certificate source repository.
//!
//! Records where and how a certificate was observed. Locations
//! (host/port) and origins (collection mechanism) are value-deduplicated
//! shared rows; source observations reference them and are returned
//! newest-first.

use crate::domain::{
    CertificateSourceData, LocationId, OriginId, SourceId, SourceLocation, SourceOrigin,
};
use crate::errors::{CertfleetError, Result};
use sqlx::{FromRow, Row, SqliteConnection};

/// One observation to record against a certificate.
#[derive(Debug, Clone)]
pub struct NewSource<'a> {
    pub timestamp: i64,
    pub tls_versions: &'a str,
    pub location: Option<NewLocation<'a>>,
    pub origin: Option<NewOrigin<'a>>,
}

#[derive(Debug, Clone)]
pub struct NewLocation<'a> {
    pub host_ip: &'a str,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct NewOrigin<'a> {
    pub origin_type: &'a str,
    pub origin_id: &'a str,
    pub origin_data: Option<&'a str>,
}

/// Find or create the shared location row for a host/port pair.
async fn upsert_location(
    conn: &mut SqliteConnection,
    location: &NewLocation<'_>,
) -> Result<i64> {
    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM tls_certificate_locations WHERE host_ip = $1 AND port = $2",
    )
    .bind(location.host_ip)
    .bind(location.port as i64)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to look up source location"))?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let id = LocationId::new();
    let result = sqlx::query(
        "INSERT INTO tls_certificate_locations (uuid, host_ip, port) VALUES ($1, $2, $3)",
    )
    .bind(id.as_str())
    .bind(location.host_ip)
    .bind(location.port as i64)
    .execute(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to insert source location"))?;

    Ok(result.last_insert_rowid())
}

/// Find or create the shared origin row for a (type, id) pair.
async fn upsert_origin(conn: &mut SqliteConnection, origin: &NewOrigin<'_>) -> Result<i64> {
    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM tls_certificate_origins WHERE origin_type = $1 AND origin_id = $2",
    )
    .bind(origin.origin_type)
    .bind(origin.origin_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to look up source origin"))?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let id = OriginId::new();
    let result = sqlx::query(
        "INSERT INTO tls_certificate_origins (uuid, origin_type, origin_id, origin_data)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(id.as_str())
    .bind(origin.origin_type)
    .bind(origin.origin_id)
    .bind(origin.origin_data)
    .execute(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to insert source origin"))?;

    Ok(result.last_insert_rowid())
}

/// Record one source observation for a certificate, deduplicating the
/// referenced location and origin by value.
pub async fn insert_source(
    conn: &mut SqliteConnection,
    certificate_rowid: i64,
    source: &NewSource<'_>,
) -> Result<SourceId> {
    let location_rowid = match &source.location {
        Some(location) => Some(upsert_location(conn, location).await?),
        None => None,
    };
    let origin_rowid = match &source.origin {
        Some(origin) => Some(upsert_origin(conn, origin).await?),
        None => None,
    };

    let id = SourceId::new();
    sqlx::query(
        "INSERT INTO tls_certificate_sources
           (uuid, tls_certificate, timestamp, tls_versions, location, origin)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(id.as_str())
    .bind(certificate_rowid)
    .bind(source.timestamp)
    .bind(source.tls_versions)
    .bind(location_rowid)
    .bind(origin_rowid)
    .execute(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to insert certificate source"))?;

    Ok(id)
}

#[derive(Debug, FromRow)]
struct SourceRow {
    uuid: String,
    timestamp: i64,
    tls_versions: String,
    location_uuid: Option<String>,
    host_ip: Option<String>,
    port: Option<i64>,
    origin_uuid: Option<String>,
    origin_type: Option<String>,
    origin_id: Option<String>,
    origin_data: Option<String>,
}

impl From<SourceRow> for CertificateSourceData {
    fn from(row: SourceRow) -> Self {
        let location = match (row.location_uuid, row.host_ip, row.port) {
            (Some(uuid), Some(host_ip), Some(port)) => Some(SourceLocation {
                id: LocationId::from_string(uuid),
                host_ip,
                port: port as u16,
            }),
            _ => None,
        };
        let origin = match (row.origin_uuid, row.origin_type, row.origin_id) {
            (Some(uuid), Some(origin_type), Some(origin_id)) => Some(SourceOrigin {
                id: OriginId::from_string(uuid),
                origin_type,
                origin_id,
                origin_data: row.origin_data,
            }),
            _ => None,
        };
        CertificateSourceData {
            id: SourceId::from_string(row.uuid),
            timestamp: row.timestamp,
            tls_versions: row.tls_versions,
            location,
            origin,
        }
    }
}

/// Every source observation of a certificate, newest first, with the
/// shared location and origin rows joined in where present.
pub async fn sources_for(
    conn: &mut SqliteConnection,
    certificate_rowid: i64,
) -> Result<Vec<CertificateSourceData>> {
    let rows = sqlx::query(
        "SELECT s.uuid AS uuid, s.timestamp AS timestamp, s.tls_versions AS tls_versions,
                l.uuid AS location_uuid, l.host_ip AS host_ip, l.port AS port,
                o.uuid AS origin_uuid, o.origin_type AS origin_type,
                o.origin_id AS origin_id, o.origin_data AS origin_data
           FROM tls_certificate_sources s
           LEFT OUTER JOIN tls_certificate_locations l ON s.location = l.id
           LEFT OUTER JOIN tls_certificate_origins o ON s.origin = o.id
          WHERE s.tls_certificate = $1
          ORDER BY s.timestamp DESC, s.id ASC",
    )
    .bind(certificate_rowid)
    .fetch_all(conn)
    .await
    .map_err(|e| CertfleetError::database(e, "Failed to list certificate sources"))?;

    rows.iter()
        .map(|row| {
            SourceRow::from_row(row)
                .map(CertificateSourceData::from)
                .map_err(|e| CertfleetError::database(e, "Failed to decode source row"))
        })
        .collect()
}

/// Number of source observations referencing a certificate.
pub async fn source_count(conn: &mut SqliteConnection, certificate_rowid: i64) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM tls_certificate_sources WHERE tls_certificate = $1")
        .bind(certificate_rowid)
        .fetch_one(conn)
        .await
        .map_err(|e| CertfleetError::database(e, "Failed to count certificate sources"))?;

    Ok(row.get("n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{migrations, DbPool};

    async fn test_pool() -> DbPool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory database");
        migrations::run_migrations(&pool).await.expect("migrations");
        pool
    }

    async fn seed_certificate(conn: &mut SqliteConnection) -> i64 {
        sqlx::query("INSERT INTO principals (uuid, name) VALUES ('p-1', 'owner')")
            .execute(&mut *conn)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO tls_certificates
               (uuid, owner, name, creation_time, modification_time, certificate,
                subject_dn, issuer_dn, md5_fingerprint, sha256_fingerprint, serial)
             VALUES ('c-1', 1, 'cert', 0, 0, '', '', '', '', '', '')",
        )
        .execute(conn)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    #[tokio::test]
    async fn locations_and_origins_deduplicate_by_value() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let cert = seed_certificate(&mut conn).await;

        let source = NewSource {
            timestamp: 100,
            tls_versions: "TLSv1.2, TLSv1.3",
            location: Some(NewLocation { host_ip: "192.0.2.10", port: 443 }),
            origin: Some(NewOrigin {
                origin_type: "Report",
                origin_id: "report-1",
                origin_data: None,
            }),
        };
        insert_source(&mut conn, cert, &source).await.unwrap();

        let again = NewSource { timestamp: 200, ..source.clone() };
        insert_source(&mut conn, cert, &again).await.unwrap();

        let locations: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tls_certificate_locations")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
        let origins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tls_certificate_origins")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(locations, 1);
        assert_eq!(origins, 1);
        assert_eq!(source_count(&mut conn, cert).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sources_are_listed_newest_first() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let cert = seed_certificate(&mut conn).await;

        for (timestamp, port) in [(100i64, 443u16), (300, 8443), (200, 993)] {
            let source = NewSource {
                timestamp,
                tls_versions: "TLSv1.3",
                location: Some(NewLocation { host_ip: "198.51.100.7", port }),
                origin: None,
            };
            insert_source(&mut conn, cert, &source).await.unwrap();
        }

        let sources = sources_for(&mut conn, cert).await.unwrap();
        let timestamps: Vec<i64> = sources.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![300, 200, 100]);

        let ports: Vec<u16> =
            sources.iter().filter_map(|s| s.location.as_ref().map(|l| l.port)).collect();
        assert_eq!(ports, vec![8443, 993, 443]);
        assert!(sources.iter().all(|s| s.origin.is_none()));
    }

    #[tokio::test]
    async fn distinct_ports_get_distinct_locations() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let cert = seed_certificate(&mut conn).await;

        for port in [443u16, 8443] {
            let source = NewSource {
                timestamp: 10,
                tls_versions: "TLSv1.2",
                location: Some(NewLocation { host_ip: "203.0.113.5", port }),
                origin: None,
            };
            insert_source(&mut conn, cert, &source).await.unwrap();
        }

        let locations: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tls_certificate_locations")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
        assert_eq!(locations, 2);
    }
}
