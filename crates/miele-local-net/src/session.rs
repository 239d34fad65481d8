//! Per-appliance session state: host, provisioning, the lazily resolved
//! device route, and the time of last successful contact.
//!
//! A session is an explicit value; the REST shell owns the registry of
//! sessions and nothing here hides mutable state behind a connection.

use crate::api::{DeviceType, DryingStep, ProgramId, ProgramPhase, Status};
use crate::dop2::{Dop2Client, Dop2Coordinate};
use crate::transport::Transport;
use crate::walker::{self, WalkReport};
use miele_local_core::dop2::Dop2Record;
use miele_local_core::error::{Error, Result};
use miele_local_core::leaves::{DecodedLeaf, LeafRegistry};
use miele_local_core::provision::ProvisioningInfo;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::{debug, info};

/// Session with one appliance.
pub struct EndpointSession {
    host: String,
    route: Option<String>,
    transport: Transport,
    registry: LeafRegistry,
    last_comm: Option<Instant>,
}

/// Serializable session description for the endpoint listing.
#[derive(Clone, Debug, Serialize)]
pub struct EndpointStatus {
    pub host: String,
    pub group_id: String,
    pub route: Option<String>,
    pub last_comm: String,
}

impl EndpointSession {
    /// Create a session. `route` is the device route when known;
    /// `None` resolves it from the device on first use.
    pub fn new(
        host: impl Into<String>,
        info: ProvisioningInfo,
        route: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            host: host.into(),
            route,
            transport: Transport::new(info)?,
            registry: LeafRegistry::builtin(),
            last_comm: None,
        })
    }

    /// Create a session over an already configured transport (custom
    /// timeout or pinned date).
    pub fn with_transport(
        host: impl Into<String>,
        transport: Transport,
        route: Option<String>,
    ) -> Self {
        Self {
            host: host.into(),
            route,
            transport,
            registry: LeafRegistry::builtin(),
            last_comm: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Register an additional structured-leaf schema for this session.
    pub fn register_leaf(
        &mut self,
        unit: u16,
        attribute: u16,
        schema: miele_local_core::leaves::LeafSchema,
    ) {
        self.registry.register(unit, attribute, schema);
    }

    /// The device route, resolving it once via `GET Devices` when not
    /// configured: a single top-level key in the device listing is the
    /// route.
    pub async fn route(&mut self) -> Result<String> {
        if let Some(route) = &self.route {
            return Ok(route.clone());
        }
        let listing = self.get_json("Devices").await?;
        let object = listing
            .as_object()
            .ok_or_else(|| Error::Protocol("device listing is not a JSON object".into()))?;
        if object.len() != 1 {
            return Err(Error::Protocol(format!(
                "cannot autodetect device route: {} devices listed",
                object.len()
            )));
        }
        let route = object.keys().next().cloned().unwrap_or_default();
        info!(host = %self.host, %route, "autodetected device route");
        self.route = Some(route.clone());
        Ok(route)
    }

    /// GET a resource and return the decrypted body verbatim (padding
    /// tail included). Updates the last-contact time on success.
    pub async fn get_raw(&mut self, path: &str) -> Result<Vec<u8>> {
        let response = self.transport.request("GET", &self.host, path, None).await?;
        self.touch();
        Ok(response.body)
    }

    /// GET a resource and parse the decrypted body as JSON (trailing
    /// padding stripped). Updates the last-contact time on success.
    pub async fn get_json(&mut self, path: &str) -> Result<Value> {
        let response = self.transport.request("GET", &self.host, path, None).await?;
        self.touch();
        if response.body.is_empty() {
            return Ok(Value::Null);
        }
        let text = response.text()?;
        serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("invalid JSON from {path}: {e}")))
    }

    /// PUT a JSON body to a resource.
    pub async fn put_json(&mut self, path: &str, body: &Value) -> Result<Value> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| Error::Usage(format!("unserializable body: {e}")))?;
        let response = self
            .transport
            .request("PUT", &self.host, path, Some(&payload))
            .await?;
        self.touch();
        if response.body.is_empty() {
            return Ok(Value::Null);
        }
        let text = response.text()?;
        serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("invalid JSON from {path}: {e}")))
    }

    /// Raw device state resource.
    pub async fn state_raw(&mut self) -> Result<Value> {
        let route = self.route().await?;
        self.get_json(&format!("Devices/{route}/State")).await
    }

    /// Raw device identification resource.
    pub async fn ident_raw(&mut self) -> Result<Value> {
        let route = self.route().await?;
        self.get_json(&format!("Devices/{route}/Ident")).await
    }

    /// State + Ident merged and annotated with decoded code names and
    /// progress figures.
    pub async fn summary(&mut self) -> Result<DeviceSummary> {
        let state = self.state_raw().await?;
        let ident = self.ident_raw().await?;
        Ok(annotate_summary(state, ident))
    }

    /// Remote start: PUT `{"ProcessAction": 1}` to the state resource.
    pub async fn process_action(&mut self) -> Result<Value> {
        let route = self.route().await?;
        debug!(host = %self.host, "sending ProcessAction");
        self.put_json(&format!("Devices/{route}/State"), &json!({"ProcessAction": 1}))
            .await
    }

    /// Wake from standby: PUT `{"DeviceAction": 2}` to the state resource.
    pub async fn device_action(&mut self) -> Result<Value> {
        let route = self.route().await?;
        debug!(host = %self.host, "sending DeviceAction");
        self.put_json(&format!("Devices/{route}/State"), &json!({"DeviceAction": 2}))
            .await
    }

    /// Read one DOP2 leaf.
    pub async fn dop2_read(
        &mut self,
        coordinate: Dop2Coordinate,
    ) -> Result<(Vec<Dop2Record>, Vec<u8>)> {
        let route = self.route().await?;
        let result = Dop2Client::new(&self.transport, &self.host, &route)
            .read_leaf(coordinate)
            .await;
        if result.is_ok() {
            self.touch();
        }
        result
    }

    /// Write one DOP2 leaf.
    pub async fn dop2_write(
        &mut self,
        unit: u16,
        attribute: u16,
        payload: &[u8],
    ) -> Result<Vec<Dop2Record>> {
        let route = self.route().await?;
        let result = Dop2Client::new(&self.transport, &self.host, &route)
            .write_leaf(unit, attribute, payload)
            .await;
        if result.is_ok() {
            self.touch();
        }
        result
    }

    /// Read and decode a device setting by id.
    pub async fn dop2_setting(&mut self, setting_id: u16) -> Result<DecodedLeaf> {
        let route = self.route().await?;
        let result = Dop2Client::new(&self.transport, &self.host, &route)
            .read_setting(&self.registry, setting_id)
            .await;
        if result.is_ok() {
            self.touch();
        }
        result
    }

    /// Walk the DOP2 attribute tree.
    pub async fn dop2_walk(&mut self) -> Result<WalkReport> {
        let route = self.route().await?;
        let result =
            walker::walk(&Dop2Client::new(&self.transport, &self.host, &route)).await;
        if result.is_ok() {
            self.touch();
        }
        result
    }

    /// Seconds since the last successful exchange, if any.
    pub fn seconds_since_contact(&self) -> Option<f64> {
        self.last_comm.map(|at| at.elapsed().as_secs_f64())
    }

    pub fn describe(&self) -> EndpointStatus {
        EndpointStatus {
            host: self.host.clone(),
            group_id: self.transport.provisioning().group_id_hex(),
            route: self.route.clone(),
            last_comm: match self.seconds_since_contact() {
                Some(secs) => format!("{secs:.1}s ago"),
                None => "never".to_string(),
            },
        }
    }

    fn touch(&mut self) {
        self.last_comm = Some(Instant::now());
    }
}

/// Annotated device summary: the merged State/Ident values plus a list
/// of enrichment steps that could not be applied. Nothing is dropped
/// silently: a present-but-undecodable field lands in
/// `annotation_failures`.
#[derive(Clone, Debug, Serialize)]
pub struct DeviceSummary {
    #[serde(flatten)]
    pub values: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotation_failures: Vec<String>,
}

/// Remote-start capability derived from the summary.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct RemoteStartState {
    pub capable: bool,
    pub enabled: bool,
}

/// Merge State and Ident and decode the known code fields into
/// `Decoded*` companions.
pub fn annotate_summary(state: Value, ident: Value) -> DeviceSummary {
    let mut failures = Vec::new();
    let mut values = Map::new();
    for (name, part) in [("State", state), ("Ident", ident)] {
        match part {
            Value::Object(object) => values.extend(object),
            Value::Null => {}
            _ => failures.push(format!("{name} resource is not a JSON object")),
        }
    }

    annotate_code(&mut values, &mut failures, "Status", |c| {
        Status::from_code(c).map(|v| v.name())
    });
    annotate_code(&mut values, &mut failures, "ProgramID", |c| {
        ProgramId::from_code(c).map(|v| v.name())
    });
    annotate_code(&mut values, &mut failures, "ProgramPhase", |c| {
        ProgramPhase::from_code(c).map(|v| v.name())
    });
    annotate_code(&mut values, &mut failures, "DeviceType", |c| {
        DeviceType::from_code(c).map(|v| v.name())
    });
    annotate_code(&mut values, &mut failures, "DryingStep", |c| {
        DryingStep::from_code(c).map(|v| v.name())
    });
    annotate_progress(&mut values, &mut failures);

    DeviceSummary { values, annotation_failures: failures }
}

/// Decide remote-start capability the way the device reports it: the
/// third flag of `RemoteEnable`, and a timer program selected on the
/// appliance.
pub fn remote_start_state(summary: &DeviceSummary) -> RemoteStartState {
    let capable = summary
        .values
        .get("RemoteEnable")
        .and_then(|v| v.get(2))
        .and_then(flag_value)
        .unwrap_or(false);
    let program_selected = summary
        .values
        .get("ProgramID")
        .and_then(Value::as_u64)
        .map(|id| id != ProgramId::Unknown.code())
        .unwrap_or(false);
    let timer_program = summary
        .values
        .get("ProgramType")
        .and_then(Value::as_u64)
        .map(|t| t == 2)
        .unwrap_or(false);
    RemoteStartState {
        capable,
        enabled: timer_program && program_selected,
    }
}

fn flag_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_u64().map(|v| v != 0),
        _ => None,
    }
}

fn annotate_code(
    values: &mut Map<String, Value>,
    failures: &mut Vec<String>,
    key: &str,
    decode: impl Fn(u64) -> Option<&'static str>,
) {
    // an absent key means there is nothing to enrich
    let Some(raw) = values.get(key).cloned() else { return };
    match raw.as_u64().map(&decode) {
        Some(Some(name)) => {
            values.insert(format!("Decoded{key}"), Value::String(name.to_string()));
        }
        Some(None) => failures.push(format!("{key}: unknown code {raw}")),
        None => failures.push(format!("{key}: not an integer ({raw})")),
    }
}

fn annotate_progress(values: &mut Map<String, Value>, failures: &mut Vec<String>) {
    let elapsed = values.get("ElapsedTime").map(hours_minutes);
    let remaining = values.get("RemainingTime").map(hours_minutes);
    match (elapsed, remaining) {
        (Some(Some(elapsed)), Some(Some(remaining))) => {
            let total = elapsed + remaining;
            let progress = if total == 0 {
                0.0
            } else {
                elapsed as f64 / total as f64
            };
            values.insert("ElapsedMinutes".into(), json!(elapsed));
            values.insert("RemainingMinutes".into(), json!(remaining));
            values.insert("Progress".into(), json!(progress));
        }
        (None, None) => {}
        _ => failures.push("ElapsedTime/RemainingTime: not [hours, minutes] pairs".into()),
    }
}

/// `[hours, minutes]` to whole minutes.
fn hours_minutes(value: &Value) -> Option<u64> {
    let pair = value.as_array()?;
    if pair.len() != 2 {
        return None;
    }
    Some(pair[0].as_u64()? * 60 + pair[1].as_u64()?)
}
