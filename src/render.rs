use crate::config::OutputConfig;
use crate::hazard::PreparedHazard;
use crate::matcher::HazardIndex;
use crate::types::{Accident, GeoPoint, Household};
use anyhow::{Context, Result};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use tracing::info;

// Constants for Web Mercator
const TILE_SIZE: u32 = 256;
const MAX_LATITUDE: f64 = 85.051_128_78;

const FILL_ALPHA: u8 = 150;
const AFFECTED_DOT: Rgba<u8> = Rgba([200, 0, 0, 255]);
const HOUSEHOLD_DOT: Rgba<u8> = Rgba([60, 60, 60, 255]);
const ACCIDENT_DOT: Rgba<u8> = Rgba([255, 140, 0, 255]);

/// Everything drawn on one hazard's tile set.
pub struct TileScene<'a> {
    pub hazard: &'a PreparedHazard,
    pub households: &'a [Household],
    pub affected_ids: HashSet<&'a str>,
    pub accidents: &'a [Accident],
}

/// Writes `{tile_dir}/{hazard_id}/{z}/{x}/{y}.png` for every configured zoom
/// level and returns the number of tiles written.
pub fn generate_tiles(output: &OutputConfig, scene: &TileScene<'_>) -> Result<usize> {
    info!(
        hazard = %scene.hazard.summary.id,
        min_zoom = output.min_zoom,
        max_zoom = output.max_zoom,
        "generating tiles"
    );

    let index = HazardIndex::new(&scene.hazard.layer);
    let fills: Vec<Option<Rgba<u8>>> = scene
        .hazard
        .layer
        .features()
        .iter()
        .map(|f| {
            scene
                .hazard
                .scale
                .color_for_feature(f, scene.hazard.legend.as_ref())
                .rgb()
                .map(|rgb| rgb.to_rgba(FILL_ALPHA))
        })
        .collect();

    let hazard_dir = output.tile_dir.join(&scene.hazard.summary.id);
    let written: Vec<usize> = (output.min_zoom..=output.max_zoom)
        .into_par_iter()
        .map(|z| render_zoom_level(&hazard_dir, z, scene, &index, &fills))
        .collect::<Result<_>>()?;

    let total = written.iter().sum();
    info!(tiles = total, dir = ?hazard_dir, "tile generation complete");
    Ok(total)
}

fn render_zoom_level(
    hazard_dir: &Path,
    zoom: u8,
    scene: &TileScene<'_>,
    index: &HazardIndex<'_>,
    fills: &[Option<Rgba<u8>>],
) -> Result<usize> {
    let mut local_tiles: HashMap<(u32, u32), RgbaImage> = HashMap::new();

    // Polygon fill, first containing feature per pixel
    let mut hazard_tiles: HashSet<(u32, u32)> = HashSet::new();
    for (_, shape) in scene.hazard.layer.shapes() {
        let (x0, y0, _, _) = lat_lon_to_tile_pixel(shape.bbox.max().y, shape.bbox.min().x, zoom);
        let (x1, y1, _, _) = lat_lon_to_tile_pixel(shape.bbox.min().y, shape.bbox.max().x, zoom);
        for tx in x0..=x1 {
            for ty in y0..=y1 {
                hazard_tiles.insert((tx, ty));
            }
        }
    }

    let filled: Vec<((u32, u32), RgbaImage)> = hazard_tiles
        .into_par_iter()
        .filter_map(|(tx, ty)| {
            let mut img: RgbaImage = ImageBuffer::new(TILE_SIZE, TILE_SIZE);
            let mut painted = false;
            for py in 0..TILE_SIZE {
                for px in 0..TILE_SIZE {
                    let (lat, lon) = tile_pixel_to_lat_lon(tx, ty, px, py, zoom);
                    let hit = index.first_containing(GeoPoint::new(lat, lon));
                    if let Some(color) = hit.and_then(|i| fills.get(i).copied().flatten()) {
                        img.put_pixel(px, py, color);
                        painted = true;
                    }
                }
            }
            painted.then_some(((tx, ty), img))
        })
        .collect();
    local_tiles.extend(filled);

    let households = scene.households.iter().filter_map(|h| {
        let color = if scene.affected_ids.contains(h.id.as_str()) {
            AFFECTED_DOT
        } else {
            HOUSEHOLD_DOT
        };
        h.location.map(|p| (p, color))
    });
    let accidents = scene
        .accidents
        .iter()
        .filter_map(|a| a.location.map(|p| (p, ACCIDENT_DOT)));

    for (point, color) in households.chain(accidents) {
        let (tx, ty, px, py) = lat_lon_to_tile_pixel(point.lat, point.lng, zoom);
        let tile_img = local_tiles
            .entry((tx, ty))
            .or_insert_with(|| ImageBuffer::new(TILE_SIZE, TILE_SIZE));
        draw_dot(tile_img, px, py, color);
    }

    // Save tiles: {hazard_dir}/{z}/{x}/{y}.png
    let z_dir = hazard_dir.join(zoom.to_string());
    fs::create_dir_all(&z_dir).context("Failed to create zoom directory")?;

    local_tiles.par_iter().try_for_each(|((x, y), img)| {
        let x_dir = z_dir.join(x.to_string());
        fs::create_dir_all(&x_dir)
            .with_context(|| format!("Failed to create tile directory {:?}", x_dir))?;
        let path = x_dir.join(format!("{}.png", y));
        img.save(&path)
            .with_context(|| format!("Failed to save tile {:?}", path))
    })?;

    Ok(local_tiles.len())
}

fn draw_dot(img: &mut RgbaImage, px: u32, py: u32, color: Rgba<u8>) {
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            let x = i64::from(px) + dx;
            let y = i64::from(py) + dy;
            if (0..i64::from(TILE_SIZE)).contains(&x) && (0..i64::from(TILE_SIZE)).contains(&y) {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

// Coordinate conversions
pub fn lat_lon_to_tile_pixel(lat: f64, lon: f64, zoom: u8) -> (u32, u32, u32, u32) {
    let n = 2.0_f64.powi(zoom as i32);
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x_t = ((lon + 180.0) / 360.0 * n).clamp(0.0, n - 1e-9);
    let lat_rad = lat.to_radians();
    let y_t = ((1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0 * n).clamp(0.0, n - 1e-9);

    let tx = x_t as u32;
    let ty = y_t as u32;

    let px = ((x_t - tx as f64) * TILE_SIZE as f64) as u32;
    let py = ((y_t - ty as f64) * TILE_SIZE as f64) as u32;

    (tx, ty, px.min(TILE_SIZE - 1), py.min(TILE_SIZE - 1))
}

/// Latitude/longitude of the centre of a tile pixel.
pub fn tile_pixel_to_lat_lon(tx: u32, ty: u32, px: u32, py: u32, zoom: u8) -> (f64, f64) {
    let n = 2.0_f64.powi(zoom as i32);
    let x_t = tx as f64 + (px as f64 + 0.5) / TILE_SIZE as f64;
    let y_t = ty as f64 + (py as f64 + 0.5) / TILE_SIZE as f64;
    let lon = x_t / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y_t / n)).sinh().atan().to_degrees();
    (lat, lon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::DEFAULT_MAX_BYTES;
    use crate::store::HazardRecord;

    #[test]
    fn tile_math_round_trips() {
        let (tx, ty, px, py) = lat_lon_to_tile_pixel(14.65, 120.98, 12);
        let (lat, lon) = tile_pixel_to_lat_lon(tx, ty, px, py, 12);
        assert!((lat - 14.65).abs() < 0.001, "{lat}");
        assert!((lon - 120.98).abs() < 0.001, "{lon}");
    }

    #[test]
    fn zoom_zero_covers_the_world() {
        assert_eq!(lat_lon_to_tile_pixel(0.0, 0.0, 0), (0, 0, 128, 128));
        let (tx, ty, _, _) = lat_lon_to_tile_pixel(89.9, 179.99, 0);
        assert_eq!((tx, ty), (0, 0));
    }

    #[test]
    fn writes_hazard_and_dot_tiles() {
        let record = HazardRecord {
            id: "flood".into(),
            name: "Flood".into(),
            description: String::new(),
            geojson: r#"{"type":"FeatureCollection","features":[{"type":"Feature",
                "properties":{"Susc":"High"},
                "geometry":{"type":"Polygon","coordinates":[[[120.9,14.6],[121.0,14.6],[121.0,14.7],[120.9,14.7],[120.9,14.6]]]}}]}"#
                .into(),
            legend_prop: None,
            color_settings: None,
        };
        let hazard = PreparedHazard::prepare(&record, DEFAULT_MAX_BYTES).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let output = OutputConfig {
            tile_dir: dir.path().to_path_buf(),
            min_zoom: 8,
            max_zoom: 9,
        };
        let scene = TileScene {
            hazard: &hazard,
            households: &[],
            affected_ids: HashSet::new(),
            accidents: &[],
        };
        let written = generate_tiles(&output, &scene).unwrap();
        assert!(written >= 2);
        assert!(dir.path().join("flood").join("8").exists());
    }

    #[test]
    fn unwritable_tile_directory_fails_the_render() {
        let record = HazardRecord {
            id: "flood".into(),
            name: "Flood".into(),
            description: String::new(),
            geojson: r#"{"type":"FeatureCollection","features":[]}"#.into(),
            legend_prop: None,
            color_settings: None,
        };
        let hazard = PreparedHazard::prepare(&record, DEFAULT_MAX_BYTES).unwrap();
        let households = vec![Household {
            id: "HH-001".into(),
            location: Some(GeoPoint::new(14.61, 121.01)),
            name: "Ana Cruz".into(),
            barangay: "Malanday".into(),
            contact: String::new(),
            members: Vec::new(),
        }];

        // A plain file where the column directory of the dot tile must go.
        let dir = tempfile::tempdir().unwrap();
        let (tx, _, _, _) = lat_lon_to_tile_pixel(14.61, 121.01, 10);
        let z_dir = dir.path().join("flood").join("10");
        fs::create_dir_all(&z_dir).unwrap();
        fs::write(z_dir.join(tx.to_string()), b"not a directory").unwrap();

        let output = OutputConfig {
            tile_dir: dir.path().to_path_buf(),
            min_zoom: 10,
            max_zoom: 10,
        };
        let scene = TileScene {
            hazard: &hazard,
            households: &households,
            affected_ids: HashSet::new(),
            accidents: &[],
        };
        let err = generate_tiles(&output, &scene).unwrap_err();
        assert!(format!("{err:#}").contains("tile"), "{err:#}");
    }
}
