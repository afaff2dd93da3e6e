//! Redis Store
//!
//! [`RemoteStore`] over a single Redis node or a Redis Cluster. Both modes share
//! one command path; only the connection used to run commands differs.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::geo::{Coord, RadiusOptions, RadiusOrder, RadiusSearchResult, Unit};
use redis::{Cmd, FromRedisValue, IntoConnectionInfo};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{
    GeoLocation, GeoMatch, GeoRadiusQuery, GeoUnit, RemoteStore, ScanCursor, StoreMode,
    Subscription,
};
use crate::error::{DcacheError, Result};

// == Connection ==
enum Connection {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

/// A node reachable directly, used for SCAN walks and pub/sub.
struct Node {
    addr: String,
    client: redis::Client,
    manager: OnceCell<ConnectionManager>,
}

impl Node {
    fn open(addr: &str, password: Option<&str>) -> Result<Self> {
        let mut info = node_url(addr).as_str().into_connection_info()?;
        if let Some(password) = password {
            info.redis.password = Some(password.to_string());
        }

        Ok(Self {
            addr: addr.to_string(),
            client: redis::Client::open(info)?,
            manager: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .manager
            .get_or_try_init(|| self.client.get_connection_manager())
            .await?;
        Ok(manager.clone())
    }
}

// == Redis Store ==
/// Redis-backed remote store.
pub struct RedisStore {
    mode: StoreMode,
    conn: Connection,
    nodes: Vec<Node>,
}

impl RedisStore {
    // == Constructors ==
    /// Connects to a single Redis node.
    pub async fn connect_single(addr: &str, password: Option<&str>) -> Result<Self> {
        let node = Node::open(addr, password)?;
        let manager = node.connection().await?;
        info!(addr = %addr, "connected to redis node");

        Ok(Self {
            mode: StoreMode::Single,
            conn: Connection::Single(manager),
            nodes: vec![node],
        })
    }

    /// Connects to a Redis Cluster through the given seed nodes.
    ///
    /// SCAN walks every seed node in turn, so the seed list should name the
    /// cluster's primaries.
    pub async fn connect_cluster(addrs: &[String], password: Option<&str>) -> Result<Self> {
        let nodes = addrs
            .iter()
            .map(|addr| Node::open(addr, password))
            .collect::<Result<Vec<_>>>()?;

        let urls: Vec<String> = addrs.iter().map(|addr| node_url(addr)).collect();
        let mut builder = ClusterClient::builder(urls);
        if let Some(password) = password {
            builder = builder.password(password.to_string());
        }
        let conn = builder.build()?.get_async_connection().await?;
        info!(nodes = addrs.len(), "connected to redis cluster");

        Ok(Self {
            mode: StoreMode::Cluster,
            conn: Connection::Cluster(conn),
            nodes,
        })
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let value: T = match &self.conn {
            Connection::Single(conn) => {
                let mut conn = conn.clone();
                cmd.query_async(&mut conn).await?
            }
            Connection::Cluster(conn) => {
                let mut conn = conn.clone();
                cmd.query_async(&mut conn).await?
            }
        };
        Ok(value)
    }

    fn node(&self, index: usize) -> Result<&Node> {
        self.nodes
            .get(index)
            .ok_or_else(|| DcacheError::InvalidRequest(format!("scan cursor names node {}", index)))
    }
}

/// Accepts bare `host:port` as well as full `redis://` URLs.
fn node_url(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("redis://{}", addr)
    }
}

fn redis_unit(unit: GeoUnit) -> Unit {
    match unit {
        GeoUnit::M => Unit::Meters,
        GeoUnit::Km => Unit::Kilometers,
        GeoUnit::Mi => Unit::Miles,
        GeoUnit::Ft => Unit::Feet,
    }
}

fn radius_options(query: &GeoRadiusQuery) -> RadiusOptions {
    let mut options = RadiusOptions::default();
    if query.with_coord {
        options = options.with_coord();
    }
    if query.with_dist {
        options = options.with_dist();
    }
    if let Some(count) = query.count {
        options = options.limit(count);
    }
    match query.ascending {
        Some(true) => options.order(RadiusOrder::Asc),
        Some(false) => options.order(RadiusOrder::Desc),
        None => options,
    }
}

fn geo_match(result: RadiusSearchResult) -> GeoMatch {
    GeoMatch {
        name: result.name,
        dist: result.dist,
        coord: result.coord.map(|c| (c.longitude, c.latitude)),
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    fn mode(&self) -> StoreMode {
        self.mode
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.query(redis::cmd("SET").arg(key).arg(value).arg("EX").arg(ttl_secs))
            .await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if ttl_secs > 0 {
            cmd.arg("EX").arg(ttl_secs);
        }
        let reply: Option<String> = self.query(&cmd).await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<u64> {
        self.query(redis::cmd("DEL").arg(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let count: u64 = self.query(redis::cmd("EXISTS").arg(key)).await?;
        Ok(count > 0)
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.query(redis::cmd("TTL").arg(key)).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.query(redis::cmd("INCRBY").arg(key).arg(delta)).await
    }

    async fn scan(
        &self,
        cursor: ScanCursor,
        pattern: &str,
        count: usize,
    ) -> Result<(ScanCursor, Vec<String>)> {
        let node = self.node(cursor.node)?;
        let mut conn = node.connection().await?;
        let (position, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor.position)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let next = next_cursor(cursor.node, position, self.nodes.len());
        if position == 0 && !next.is_start() {
            debug!(node = %node.addr, "scan finished on node, moving to next");
        }
        Ok((next, keys))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let _receivers: u64 = self
            .query(redis::cmd("PUBLISH").arg(channel).arg(message))
            .await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        // Cluster PUBLISH fans out to every node, so any reachable node will do.
        let mut last_error = None;
        for node in &self.nodes {
            match node.client.get_async_pubsub().await {
                Ok(mut pubsub) => match pubsub.subscribe(channel).await {
                    Ok(()) => {
                        info!(node = %node.addr, channel = %channel, "subscribed");
                        return Ok(Box::new(RedisSubscription { pubsub }));
                    }
                    Err(e) => last_error = Some(e),
                },
                Err(e) => {
                    warn!(node = %node.addr, error = %e, "pub/sub connection failed");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => e.into(),
            None => DcacheError::Connection("no node available for pub/sub".to_string()),
        })
    }

    async fn ping(&self) -> Result<()> {
        let _pong: String = self.query(&redis::cmd("PING")).await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<u64> {
        self.query(redis::cmd("ZADD").arg(key).arg(score).arg(member))
            .await
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.query(redis::cmd("ZRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>> {
        self.query(
            redis::cmd("ZRANGE")
                .arg(key)
                .arg(start)
                .arg(stop)
                .arg("WITHSCORES"),
        )
        .await
    }

    async fn zrevrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>> {
        self.query(
            redis::cmd("ZREVRANGE")
                .arg(key)
                .arg(start)
                .arg(stop)
                .arg("WITHSCORES"),
        )
        .await
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<u64> {
        self.query(redis::cmd("ZREM").arg(key).arg(member)).await
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.query(redis::cmd("ZCARD").arg(key)).await
    }

    async fn geo_add(&self, key: &str, locations: &[GeoLocation]) -> Result<u64> {
        let mut cmd = redis::cmd("GEOADD");
        cmd.arg(key);
        for location in locations {
            cmd.arg(location.longitude)
                .arg(location.latitude)
                .arg(&location.name);
        }
        self.query(&cmd).await
    }

    async fn geo_pos(&self, key: &str, members: &[String]) -> Result<Vec<Option<(f64, f64)>>> {
        let coords: Vec<Option<Coord<f64>>> =
            self.query(redis::cmd("GEOPOS").arg(key).arg(members)).await?;
        Ok(coords
            .into_iter()
            .map(|c| c.map(|c| (c.longitude, c.latitude)))
            .collect())
    }

    async fn geo_dist(
        &self,
        key: &str,
        member1: &str,
        member2: &str,
        unit: GeoUnit,
    ) -> Result<Option<f64>> {
        self.query(
            redis::cmd("GEODIST")
                .arg(key)
                .arg(member1)
                .arg(member2)
                .arg(redis_unit(unit)),
        )
        .await
    }

    async fn geo_radius(
        &self,
        key: &str,
        longitude: f64,
        latitude: f64,
        query: &GeoRadiusQuery,
    ) -> Result<Vec<GeoMatch>> {
        let results: Vec<RadiusSearchResult> = self
            .query(
                redis::cmd("GEORADIUS")
                    .arg(key)
                    .arg(longitude)
                    .arg(latitude)
                    .arg(query.radius)
                    .arg(redis_unit(query.unit))
                    .arg(radius_options(query)),
            )
            .await?;
        Ok(results.into_iter().map(geo_match).collect())
    }

    async fn geo_radius_by_member(
        &self,
        key: &str,
        member: &str,
        query: &GeoRadiusQuery,
    ) -> Result<Vec<GeoMatch>> {
        let results: Vec<RadiusSearchResult> = self
            .query(
                redis::cmd("GEORADIUSBYMEMBER")
                    .arg(key)
                    .arg(member)
                    .arg(query.radius)
                    .arg(redis_unit(query.unit))
                    .arg(radius_options(query)),
            )
            .await?;
        Ok(results.into_iter().map(geo_match).collect())
    }

    async fn geo_hash(&self, key: &str, members: &[String]) -> Result<Vec<Option<String>>> {
        self.query(redis::cmd("GEOHASH").arg(key).arg(members))
            .await
    }
}

/// Cursor after a SCAN on `node` returned `position`. A finished node hands
/// over to the next one; the last node finishing ends the walk.
fn next_cursor(node: usize, position: u64, nodes: usize) -> ScanCursor {
    if position != 0 {
        ScanCursor { node, position }
    } else if node + 1 < nodes {
        ScanCursor {
            node: node + 1,
            position: 0,
        }
    } else {
        ScanCursor::START
    }
}

// == Redis Subscription ==
struct RedisSubscription {
    pubsub: PubSub,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn recv(&mut self) -> Result<Option<String>> {
        match self.pubsub.on_message().next().await {
            Some(msg) => Ok(Some(msg.get_payload::<String>()?)),
            None => Ok(None),
        }
    }
}
