//! Geo Reference Builder
//!
//! One-shot ETL that populates the CSV tables of administrative areas and
//! their bounding boxes consumed by the profiler's geo reference.
//!
//! Sources, in order:
//! 1. A Wikidata SPARQL endpoint for admin levels 0-2: entity, label,
//!    parent, geoshape URL, and OSM relation id.
//! 2. The geoshape files themselves (GeoJSON), from which bounding boxes
//!    are computed.
//! 3. For level-1 entities with no usable shape, the OSM API: the
//!    relation's full geometry, bounding the nodes of its boundary ways.
//!
//! Each output file is skipped when it already exists, and the OSM side is
//! resumable through a JSON checkpoint, so an interrupted run picks up
//! where it left off.
//!
//! # Usage
//!
//! ```text
//! build-geo-data [OUTPUT_DIR]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use quick_xml::events::Event;
use serde_json::Value;

const SPARQL_ENDPOINT: &str = "https://query.wikidata.org/sparql";
const OSM_API: &str = "https://www.openstreetmap.org/api/0.6";

/// Wikidata "instance of" classes per admin level.
const LEVEL_CLASSES: &[(u8, &str)] = &[
    (0, "Q6256"),     // country
    (1, "Q10864048"), // first-level administrative division
    (2, "Q13220204"), // second-level administrative division
];

/// Pause between remote requests, staying polite to public endpoints.
const REQUEST_PAUSE: Duration = Duration::from_millis(500);

/// Checkpoint file for the OSM side of the fetch.
const CHECKPOINT_FILE: &str = "osm_checkpoint.json";

/// How often the checkpoint is flushed to disk.
const CHECKPOINT_EVERY: usize = 20;

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
struct Bbox {
    min_lon: f64,
    max_lon: f64,
    min_lat: f64,
    max_lat: f64,
}

impl Bbox {
    fn empty() -> Self {
        Self {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
        }
    }

    fn add(&mut self, lon: f64, lat: f64) {
        self.min_lon = self.min_lon.min(lon);
        self.max_lon = self.max_lon.max(lon);
        self.min_lat = self.min_lat.min(lat);
        self.max_lat = self.max_lat.max(lat);
    }

    fn is_valid(&self) -> bool {
        self.min_lon <= self.max_lon && self.min_lat <= self.max_lat
    }
}

#[derive(Debug)]
struct AdminEntity {
    id: String,
    name: String,
    parent: Option<String>,
    shape_url: Option<String>,
    osm_relation: Option<String>,
    bbox: Option<Bbox>,
}

struct Fetcher {
    http: reqwest::blocking::Client,
}

impl Fetcher {
    fn new() -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(datascope::config::ProfilerConfig::user_agent())
            .timeout(Duration::from_secs(120))
            .build()
            .context("building HTTP client")?;
        Ok(Self { http })
    }

    /// Get results from the SPARQL endpoint.
    fn sparql_query(&self, query: &str) -> Result<Vec<Value>> {
        tracing::info!("Querying SPARQL endpoint");
        let response = self
            .http
            .get(SPARQL_ENDPOINT)
            .query(&[("query", query)])
            .header("Accept", "application/sparql-results+json")
            .send()
            .context("SPARQL request failed")?
            .error_for_status()
            .context("SPARQL endpoint returned an error")?;
        let body: Value = response.json().context("SPARQL response is not JSON")?;
        let results = body["results"]["bindings"]
            .as_array()
            .cloned()
            .context("SPARQL response has no bindings")?;
        tracing::info!(results = results.len(), "SPARQL results");
        Ok(results)
    }

    fn get_text(&self, url: &str) -> Result<String> {
        std::thread::sleep(REQUEST_PAUSE);
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("fetching {url}"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error"))?;
        Ok(response.text()?)
    }
}

fn binding_str(row: &Value, name: &str) -> Option<String> {
    row.get(name)?.get("value")?.as_str().map(str::to_owned)
}

/// Strip the entity URI down to its Q-id.
fn q_entity(row: &Value, name: &str) -> Option<String> {
    let uri = binding_str(row, name)?;
    uri.rsplit('/').next().map(str::to_owned)
}

fn level_query(class: &str) -> String {
    format!(
        "SELECT ?item ?itemLabel ?parent ?shape ?osm\n\
         WHERE\n\
         {{\n\
           ?item wdt:P31 wd:{class}.\n\
           MINUS{{ ?item wdt:P31 wd:Q3024240. }}\n\
           OPTIONAL{{ ?item wdt:P131 ?parent. }}\n\
           OPTIONAL{{ ?item wdt:P3896 ?shape. }}\n\
           OPTIONAL{{ ?item wdt:P402 ?osm. }}\n\
           SERVICE wikibase:label {{\n\
             bd:serviceParam wikibase:language \"[AUTO_LANGUAGE],en\".\n\
           }}\n\
         }}"
    )
}

fn fetch_entities(fetcher: &Fetcher, class: &str) -> Result<Vec<AdminEntity>> {
    let rows = fetcher.sparql_query(&level_query(class))?;
    let mut entities = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let Some(id) = q_entity(&row, "item") else { continue };
        let Some(name) = binding_str(&row, "itemLabel") else { continue };
        // SPARQL duplicates entities with several shapes; keep the first
        if seen.contains_key(&id) {
            continue;
        }
        seen.insert(id.clone(), entities.len());
        entities.push(AdminEntity {
            id,
            name,
            parent: q_entity(&row, "parent"),
            shape_url: binding_str(&row, "shape"),
            osm_relation: binding_str(&row, "osm"),
            bbox: None,
        });
    }
    Ok(entities)
}

/// Walk a GeoJSON geometry, feeding every `[lon, lat]` position into the
/// bounding box.
fn walk_coordinates(value: &Value, bbox: &mut Bbox) {
    if let Some(array) = value.as_array() {
        if array.len() >= 2 {
            if let (Some(lon), Some(lat)) = (array[0].as_f64(), array[1].as_f64()) {
                bbox.add(lon, lat);
                return;
            }
        }
        for item in array {
            walk_coordinates(item, bbox);
        }
    } else if let Some(object) = value.as_object() {
        if let Some(coordinates) = object.get("coordinates") {
            walk_coordinates(coordinates, bbox);
        } else {
            for item in object.values() {
                walk_coordinates(item, bbox);
            }
        }
    }
}

fn bbox_from_geoshape(fetcher: &Fetcher, url: &str) -> Result<Bbox> {
    // Wikidata bug: '+' in the map data title must be '_'
    let url = match url.rfind('/') {
        Some(pos) => format!("{}{}", &url[..=pos], url[pos + 1..].replace('+', "_")),
        None => url.to_owned(),
    };
    let text = fetcher.get_text(&url)?;
    let geojson: Value = serde_json::from_str(&text).context("geoshape is not JSON")?;
    let mut bbox = Bbox::empty();
    walk_coordinates(&geojson, &mut bbox);
    anyhow::ensure!(bbox.is_valid(), "geoshape has no coordinates");
    Ok(bbox)
}

/// Bound an OSM relation by the nodes of its boundary ways.
fn bbox_from_osm_relation(fetcher: &Fetcher, relation: &str) -> Result<Bbox> {
    let xml = fetcher.get_text(&format!("{OSM_API}/relation/{relation}/full"))?;
    osm_bbox_from_xml(&xml).with_context(|| format!("relation {relation}"))
}

/// Parse an OSM `/full` relation response and bound its area.
///
/// The response inlines every node of every member way; ways tagged
/// `boundary` delimit the area. When no way qualifies, all nodes are used.
fn osm_bbox_from_xml(xml: &str) -> Result<Bbox> {
    let mut nodes: HashMap<String, (f64, f64)> = HashMap::new();
    let mut way_nodes: Vec<String> = Vec::new();
    let mut way_is_boundary = false;
    let mut boundary_node_ids: Vec<String> = Vec::new();

    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let attr = |name: &[u8]| -> Option<String> {
                    e.attributes().flatten().find_map(|a| {
                        (a.key.as_ref() == name)
                            .then(|| String::from_utf8_lossy(&a.value).into_owned())
                    })
                };
                match e.name().as_ref() {
                    b"node" => {
                        if let (Some(id), Some(lat), Some(lon)) =
                            (attr(b"id"), attr(b"lat"), attr(b"lon"))
                        {
                            if let (Ok(lat), Ok(lon)) = (lat.parse(), lon.parse()) {
                                nodes.insert(id, (lon, lat));
                            }
                        }
                    }
                    b"way" => {
                        way_nodes.clear();
                        way_is_boundary = false;
                    }
                    b"nd" => {
                        if let Some(node_ref) = attr(b"ref") {
                            way_nodes.push(node_ref);
                        }
                    }
                    b"tag" => {
                        if attr(b"k").as_deref() == Some("boundary") {
                            way_is_boundary = true;
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"way" && way_is_boundary {
                    boundary_node_ids.extend(way_nodes.drain(..));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("malformed OSM XML: {e}")),
            _ => {}
        }
        buf.clear();
    }

    let mut bbox = Bbox::empty();
    let chosen: Box<dyn Iterator<Item = &(f64, f64)>> = if boundary_node_ids.is_empty() {
        Box::new(nodes.values())
    } else {
        Box::new(
            boundary_node_ids
                .iter()
                .filter_map(|id| nodes.get(id)),
        )
    };
    for &(lon, lat) in chosen {
        bbox.add(lon, lat);
    }
    anyhow::ensure!(bbox.is_valid(), "relation has no usable nodes");
    Ok(bbox)
}

type Checkpoint = HashMap<String, Option<Bbox>>;

fn load_checkpoint(path: &Path) -> Checkpoint {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    let text = serde_json::to_string(checkpoint)?;
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

/// Fill missing bounding boxes: geoshapes first, then the OSM fallback for
/// level-1 entities, checkpointed.
fn fill_bboxes(
    fetcher: &Fetcher,
    entities: &mut [AdminEntity],
    level: u8,
    checkpoint_path: &Path,
) -> Result<()> {
    let mut checkpoint = load_checkpoint(checkpoint_path);
    let mut since_flush = 0usize;

    for entity in entities.iter_mut() {
        if let Some(done) = checkpoint.get(&entity.id) {
            entity.bbox = *done;
            continue;
        }

        let mut bbox = None;
        if let Some(url) = &entity.shape_url {
            match bbox_from_geoshape(fetcher, url) {
                Ok(b) => bbox = Some(b),
                Err(e) => {
                    tracing::warn!(entity = %entity.id, error = %e, "Geoshape failed")
                }
            }
        }
        if bbox.is_none() && level == 1 {
            if let Some(relation) = &entity.osm_relation {
                match bbox_from_osm_relation(fetcher, relation) {
                    Ok(b) => bbox = Some(b),
                    Err(e) => {
                        tracing::warn!(entity = %entity.id, error = %e, "OSM fallback failed")
                    }
                }
            }
        }

        entity.bbox = bbox;
        checkpoint.insert(entity.id.clone(), bbox);
        since_flush += 1;
        if since_flush >= CHECKPOINT_EVERY {
            save_checkpoint(checkpoint_path, &checkpoint)?;
            since_flush = 0;
        }
    }
    save_checkpoint(checkpoint_path, &checkpoint)
}

fn write_level(path: &Path, entities: &[AdminEntity]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record([
        "id", "name", "parent", "min_lon", "max_lon", "min_lat", "max_lat",
    ])?;
    for entity in entities {
        let bbox = entity.bbox;
        let fmt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        writer.write_record([
            entity.id.as_str(),
            entity.name.as_str(),
            entity.parent.as_deref().unwrap_or(""),
            &fmt(bbox.map(|b| b.min_lon)),
            &fmt(bbox.map(|b| b.max_lon)),
            &fmt(bbox.map(|b| b.min_lat)),
            &fmt(bbox.map(|b| b.max_lat)),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn run(output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let fetcher = Fetcher::new()?;
    let checkpoint_path = output_dir.join(CHECKPOINT_FILE);

    for &(level, class) in LEVEL_CLASSES {
        let path = output_dir.join(format!("admin_{level}.csv"));
        if path.exists() {
            tracing::info!(path = %path.display(), "Skipping existing output");
            continue;
        }

        tracing::info!(level, "Fetching admin entities");
        let mut entities = fetch_entities(&fetcher, class)?;
        tracing::info!(level, count = entities.len(), "Entities fetched");

        fill_bboxes(&fetcher, &mut entities, level, &checkpoint_path)?;

        // Write to a temp name first so a crash never leaves a partial
        // table that a later run would skip
        let tmp_path = output_dir.join(format!("admin_{level}.csv.tmp"));
        write_level(&tmp_path, &entities)?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("renaming into {}", path.display()))?;
        tracing::info!(path = %path.display(), "Table written");
    }

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let output_dir = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("geo_data"), PathBuf::from);
    run(&output_dir)
}
