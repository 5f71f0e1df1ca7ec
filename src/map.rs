//! GeoJSON rendering of geolocated hops, loadable by any web map.

use crate::geolocate::GeoLocation;
use crate::security::DeliveryPath;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// A `FeatureCollection` with one Point per located hop and, when two or
/// more hops are located, a LineString through them in path order.
/// Returns `None` when no hop has coordinates.
pub fn render_geojson(
    path: &DeliveryPath,
    locations: &BTreeMap<usize, GeoLocation>,
) -> Option<Value> {
    let mut features = Vec::new();
    let mut line = Vec::new();

    for hop in &path.hops {
        let Some(location) = locations.get(&hop.index) else {
            continue;
        };
        // GeoJSON positions are [longitude, latitude]
        let position = json!([location.lon, location.lat]);
        line.push(position.clone());

        features.push(json!({
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": position },
            "properties": {
                "hop": hop.index,
                "from_host": hop.record.from_host(),
                "ip": location.ip.to_string(),
                "city": location.city,
                "country": location.country,
                "tls_used": hop.tls_used,
            },
        }));
    }

    if features.is_empty() {
        log::info!("No geolocated hops, skipping map");
        return None;
    }

    if line.len() > 1 {
        features.push(json!({
            "type": "Feature",
            "geometry": { "type": "LineString", "coordinates": line },
            "properties": { "name": "delivery path" },
        }));
    }

    Some(json!({ "type": "FeatureCollection", "features": features }))
}
