//! The standard action suite
//!
//! Each step issues one action (or a small family of them) and writes the
//! response bodies into the report directory. A failed request ends the run.

use crate::report::{Report, slug};
use crate::settings::{MtrParams, ProbeSettings};
use anyhow::{Context, Result};
use beacon_core::{Normalizer, snapshot_entries};
use beacon_gateway::{ActionResponse, GatewayClient};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

pub const PING: &str = "beacon:ping";
pub const RAILWAY_SNAPSHOT: &str = "mtr:get_railway_snapshot";
pub const ROUTE_TRAINS: &str = "mtr:get_route_trains";
pub const STATION_SCHEDULE: &str = "mtr:get_station_schedule";
pub const DEPOT_TRAINS: &str = "mtr:get_depot_trains";
pub const CREATE_NETWORK: &str = "create:get_network";
pub const CREATE_REALTIME: &str = "create:get_realtime";

/// Runs the suite over one established connection
pub struct Suite<'a> {
    client: &'a GatewayClient,
    report: &'a Report,
    mtr: &'a MtrParams,
    normalizer: Normalizer,
}

impl<'a> Suite<'a> {
    pub fn new(client: &'a GatewayClient, report: &'a Report, settings: &'a ProbeSettings) -> Self {
        Self {
            client,
            report,
            mtr: &settings.mtr,
            normalizer: Normalizer::new(),
        }
    }

    pub async fn run(&self) -> Result<()> {
        self.ping().await?;
        self.railway_snapshot().await?;
        self.route_trains().await?;
        self.station_schedule().await?;
        self.depot_trains().await?;
        self.create_network().await?;
        self.create_realtime().await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let response = self.request(PING, json!({"echo": "tests"})).await?;
        self.save("beacon_ping.json", &response).await
    }

    async fn railway_snapshot(&self) -> Result<()> {
        let response = self
            .request(RAILWAY_SNAPSHOT, self.dimension_payload(Map::new()))
            .await?;
        self.save(
            &format!("mtr_railway_snapshot_{}.json", self.dimension_slug()),
            &response,
        )
        .await?;

        let entries = snapshot_entries(response.payload());
        if entries.is_empty() {
            warn!("No snapshots returned from provider");
        }

        for entry in entries {
            let Some(blob) = entry.payload else {
                continue;
            };
            let dimension = snapshot_dimension(entry.dimension, self.mtr.dimension.as_deref());
            let stem = format!("mtr_railway_snapshot_{}", slug(&dimension));

            let bytes = match blob.bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Failed to decode snapshot for {}: {}", dimension, e);
                    continue;
                }
            };
            self.report
                .write_bytes(&format!("{}.msgpack", stem), &bytes)
                .await?;

            match blob.to_json(&self.normalizer) {
                Ok(normalized) => {
                    self.report
                        .write_json(&format!("{}.json", stem), &normalized)
                        .await?;
                }
                Err(e) => warn!("Failed to decode snapshot for {}: {}", dimension, e),
            }
        }
        Ok(())
    }

    async fn route_trains(&self) -> Result<()> {
        let mut payload = Map::new();
        payload.insert("routeId".into(), json!(self.mtr.route_id));
        let response = self
            .request(ROUTE_TRAINS, self.dimension_payload(payload))
            .await?;

        let suffix = if self.mtr.route_id > 0 {
            self.mtr.route_id.to_string()
        } else {
            "all".to_string()
        };
        self.save(
            &format!(
                "mtr_route_trains_{}_route_{}.json",
                self.dimension_slug(),
                suffix
            ),
            &response,
        )
        .await
    }

    async fn station_schedule(&self) -> Result<()> {
        let Some(station_id) = &self.mtr.station_id else {
            info!("Skipping station schedule (PROVIDER_MTR_STATION_ID not set)");
            return Ok(());
        };

        let mut payload = Map::new();
        payload.insert("stationId".into(), json!(station_id));
        if let Some(platform_id) = &self.mtr.platform_id {
            payload.insert("platformId".into(), json!(platform_id));
        }
        let response = self
            .request(STATION_SCHEDULE, self.dimension_payload(payload))
            .await?;
        self.save(
            &format!(
                "mtr_station_schedule_{}_station_{}.json",
                self.dimension_slug(),
                slug(station_id)
            ),
            &response,
        )
        .await
    }

    async fn depot_trains(&self) -> Result<()> {
        let mut payload = Map::new();
        payload.insert("depotId".into(), json!(self.mtr.depot_id));
        let response = self
            .request(DEPOT_TRAINS, self.dimension_payload(payload))
            .await?;

        let suffix = if self.mtr.depot_id > 0 {
            format!("depot_{}", self.mtr.depot_id)
        } else {
            "all".to_string()
        };
        self.save(
            &format!("mtr_depot_trains_{}_{}.json", self.dimension_slug(), suffix),
            &response,
        )
        .await
    }

    async fn create_network(&self) -> Result<()> {
        let response = self
            .request(CREATE_NETWORK, json!({"includePolylines": true}))
            .await?;
        self.save("create_network_all.json", &response).await?;

        for graph_id in graph_ids(response.payload()) {
            let graph = self
                .request(
                    CREATE_NETWORK,
                    json!({"graphId": graph_id, "includePolylines": true}),
                )
                .await?;
            self.save(&format!("create_network_{}.json", slug(&graph_id)), &graph)
                .await?;
        }
        Ok(())
    }

    async fn create_realtime(&self) -> Result<()> {
        let response = self.request(CREATE_REALTIME, json!({})).await?;
        self.save("create_realtime.json", &response).await
    }

    async fn request(&self, action: &str, payload: Value) -> Result<ActionResponse> {
        let response = self
            .client
            .request(action, payload)
            .await
            .with_context(|| format!("{} failed", action))?;
        if !response.is_ok() {
            warn!(
                "{} returned {}: {}",
                action,
                response.result.as_deref().unwrap_or("?"),
                response.message.as_deref().unwrap_or("")
            );
        }
        Ok(response)
    }

    async fn save(&self, name: &str, response: &ActionResponse) -> Result<()> {
        self.report
            .write_json(name, &serde_json::to_value(response)?)
            .await?;
        Ok(())
    }

    /// Add `dimension` when one is configured
    fn dimension_payload(&self, mut payload: Map<String, Value>) -> Value {
        if let Some(dimension) = &self.mtr.dimension {
            payload.insert("dimension".into(), json!(dimension));
        }
        Value::Object(payload)
    }

    fn dimension_slug(&self) -> String {
        slug(self.mtr.dimension.as_deref().unwrap_or("all"))
    }
}

/// Dimension a snapshot is filed under. An empty name counts as missing.
fn snapshot_dimension(entry: Option<String>, configured: Option<&str>) -> String {
    entry
        .filter(|d| !d.is_empty())
        .or_else(|| configured.filter(|d| !d.is_empty()).map(String::from))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Non-empty `graphId` strings from a `create:get_network` payload
fn graph_ids(payload: &Value) -> Vec<String> {
    payload
        .get("graphs")
        .and_then(Value::as_array)
        .map(|graphs| {
            graphs
                .iter()
                .filter_map(|graph| graph.get("graphId").and_then(Value::as_str))
                .filter(|id| !id.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_gateway::tcp::{TcpReadWrapper, TcpWriteWrapper};
    use beacon_gateway::{AsyncReader, AsyncWriter};
    use tokio::net::TcpListener;

    /// Answers every action until the client hangs up
    async fn serve(listener: TcpListener) -> Vec<String> {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let mut reader = TcpReadWrapper::new(read_half, 1024 * 1024);
        let mut writer = TcpWriteWrapper(write_half);
        let mut actions = Vec::new();

        while let Ok(Some(frame)) = reader.read_frame().await {
            let envelope: Value = serde_json::from_slice(&frame).unwrap();
            let body = &envelope["body"];
            let reply = match envelope["type"].as_str().unwrap() {
                "handshake" => json!({
                    "type": "handshake_ack",
                    "body": {"connectionId": "c", "serverName": "mock", "modVersion": "1"}
                }),
                _ => {
                    let action = body["action"].as_str().unwrap().to_string();
                    let payload = match action.as_str() {
                        RAILWAY_SNAPSHOT => json!({"snapshots": [
                            // {"a": 1}
                            {"dimension": "minecraft:overworld", "payload": "gaFhAQ=="},
                            // 0xc1 is not valid MessagePack
                            {"dimension": "minecraft:the_end", "payload": "wQ=="}
                        ]}),
                        CREATE_NETWORK if body["payload"].get("graphId").is_none() => {
                            json!({"graphs": [{"graphId": "g:1"}]})
                        }
                        _ => json!({"echo": body["payload"]}),
                    };
                    actions.push(action);
                    json!({
                        "type": "response",
                        "body": {"requestId": body["requestId"], "result": "OK", "payload": payload}
                    })
                }
            };
            writer
                .write_frame(&serde_json::to_vec(&reply).unwrap())
                .await
                .unwrap();
        }
        actions
    }

    #[tokio::test]
    async fn test_suite_against_mock_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        let server = tokio::spawn(serve(listener));

        let dir = std::env::temp_dir().join(format!("beacon-probe-suite-{}", std::process::id()));
        let settings = ProbeSettings::from_lookup(
            |key| (key == "PROVIDER_PORT").then(|| port.clone()),
            Some(dir.to_string_lossy().into_owned()),
        )
        .unwrap();
        let report = Report::prepare(settings.output_dir()).await.unwrap();

        let mut client = GatewayClient::new(settings.gateway.clone());
        client.connect().await.unwrap();
        Suite::new(&client, &report, &settings).run().await.unwrap();
        client.close().await;

        let actions = server.await.unwrap();
        assert_eq!(
            actions,
            vec![
                PING,
                RAILWAY_SNAPSHOT,
                ROUTE_TRAINS,
                DEPOT_TRAINS,
                CREATE_NETWORK,
                CREATE_NETWORK,
                CREATE_REALTIME
            ]
        );

        for name in [
            "beacon_ping.json",
            "mtr_railway_snapshot_minecraft_overworld.json",
            "mtr_railway_snapshot_minecraft_overworld.msgpack",
            "mtr_railway_snapshot_minecraft_the_end.msgpack",
            "mtr_route_trains_minecraft_overworld_route_all.json",
            "mtr_depot_trains_minecraft_overworld_all.json",
            "create_network_all.json",
            "create_network_g_1.json",
            "create_realtime.json",
        ] {
            assert!(dir.join(name).is_file(), "missing {}", name);
        }
        // Undecodable snapshot gets its raw bytes but no JSON
        assert!(!dir.join("mtr_railway_snapshot_minecraft_the_end.json").exists());

        let ping: Value =
            serde_json::from_slice(&std::fs::read(dir.join("beacon_ping.json")).unwrap()).unwrap();
        assert_eq!(ping["data"]["payload"], json!({"echo": {"echo": "tests"}}));

        let snapshot: Value = serde_json::from_slice(
            &std::fs::read(dir.join("mtr_railway_snapshot_minecraft_overworld.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(snapshot["data"], json!({"a": 1}));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_snapshot_dimension_falls_back_on_empty() {
        assert_eq!(
            snapshot_dimension(Some("minecraft:the_nether".into()), Some("minecraft:overworld")),
            "minecraft:the_nether"
        );
        assert_eq!(
            snapshot_dimension(Some(String::new()), Some("minecraft:overworld")),
            "minecraft:overworld"
        );
        assert_eq!(snapshot_dimension(None, Some("minecraft:overworld")), "minecraft:overworld");
        assert_eq!(snapshot_dimension(Some(String::new()), None), "unknown");
        assert_eq!(snapshot_dimension(Some(String::new()), Some("")), "unknown");
        assert_eq!(slug(&snapshot_dimension(Some(String::new()), None)), "unknown");
    }

    #[test]
    fn test_graph_ids() {
        let payload = json!({
            "graphs": [
                {"graphId": "5f3c-aa"},
                {"graphId": ""},
                {"name": "no id"},
                {"graphId": 12}
            ]
        });
        assert_eq!(graph_ids(&payload), vec!["5f3c-aa".to_string()]);
        assert!(graph_ids(&json!({})).is_empty());
    }
}
