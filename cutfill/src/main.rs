mod options;

use anyhow::{anyhow, Error as AnyError};
use clap::Parser;
use earthwork::{
    check_extent, load_grid, read_geojson, reproject, threshold_cells, to_feature_collection,
    Analysis, AnalysisResult, GridRole, ReferenceMode,
};
use elevation::{write_geotiff, ElevationGrid};
use geojson::{JsonObject, JsonValue};
use log::info;
use options::{Cli, Command as CliCmd, Format};
use serde::Serialize;
use std::{fs::File, io::Write, path::Path};

fn main() -> Result<(), AnyError> {
    let Cli { cmd } = Cli::parse();

    env_logger::init();

    match cmd {
        CliCmd::Volume {
            surface,
            polygons,
            reference,
            mode,
            altitude,
            target_crs,
            resampling,
            sequential,
            spill,
            grid,
            format,
        } => {
            let source = grid.source();
            let surface = load_grid(&source, GridRole::Surface, surface)?;
            let reference = reference
                .map(|path| load_grid(&source, GridRole::Reference, path))
                .transpose()?;
            let polygons = read_polygons(&polygons)?;

            let mode = match (mode, &reference, altitude) {
                (Some(mode), _, _) => mode,
                (None, Some(_), _) => ReferenceMode::DifferenceOfGrids,
                (None, None, Some(_)) => ReferenceMode::ScalarAltitude,
                (None, None, None) => ReferenceMode::BoundaryAverageAltitude,
            };
            let mut builder = Analysis::builder()
                .surface(&surface)
                .mode(mode)
                .resampling(resampling)
                .parallel(!sequential)
                .spill(spill);
            if let Some(reference) = &reference {
                builder = builder.reference_grid(reference);
            }
            if let Some(altitude) = altitude {
                builder = builder.altitude(altitude);
            }
            if let Some(crs) = target_crs {
                builder = builder.target_crs(crs);
            }
            let result = builder.build()?.run(&polygons)?;

            match format {
                Format::Csv => print_csv(&result),
                Format::Json => print_json(&result),
                Format::Table => print_table(&result, &mut std::io::stdout().lock()),
            }
        }

        CliCmd::Reproject {
            input,
            output,
            target_crs,
            resampling,
            grid,
        } => {
            let src = load_grid(&grid.source(), GridRole::Surface, input)?;
            let dst = reproject(&src, target_crs.as_ref(), resampling)?;
            write_geotiff(&dst, &output)?;
            info!("wrote {:?} in {}", output, dst.crs());
            Ok(())
        }

        CliCmd::Info {
            grid_path,
            json,
            grid,
        } => {
            let grid = load_grid(&grid.source(), GridRole::Surface, grid_path)?;
            print_info(&grid, json)
        }

        CliCmd::Validate {
            grid_path,
            polygons,
            grid,
        } => {
            let grid = load_grid(&grid.source(), GridRole::Surface, grid_path)?;
            let polygons = read_polygons(&polygons)?;
            let warnings = check_extent(&grid, &polygons);
            let mut stdout = std::io::stdout().lock();
            for warning in &warnings {
                writeln!(stdout, "{warning}")?;
            }
            eprintln!("{} polygons, {} warnings", polygons.len(), warnings.len());
            Ok(())
        }

        CliCmd::Autodraw {
            grid_path,
            threshold,
            grid,
        } => {
            let grid = load_grid(&grid.source(), GridRole::Surface, grid_path)?;
            let mut collection = to_feature_collection(&threshold_cells(&grid, threshold));
            if grid.crs() != &elevation::Crs::WGS84 {
                collection.foreign_members = Some(crs_member(&grid));
            }
            eprintln!("{} cells above {threshold}", collection.features.len());
            println!("{}", serde_json::to_string(&collection)?);
            Ok(())
        }
    }
}

fn read_polygons(path: &Path) -> Result<Vec<earthwork::Polygon>, AnyError> {
    let polygons = read_geojson(File::open(path)?)?;
    if polygons.is_empty() {
        return Err(anyhow!("{path:?} holds no polygons"));
    }
    Ok(polygons)
}

/// Legacy `crs` member naming `grid`'s system.
fn crs_member(grid: &ElevationGrid) -> JsonObject {
    let name = grid.crs().to_string();
    let mut properties = JsonObject::new();
    properties.insert("name".to_string(), JsonValue::from(name));
    let mut crs = JsonObject::new();
    crs.insert("type".to_string(), JsonValue::from("name"));
    crs.insert("properties".to_string(), JsonValue::Object(properties));
    let mut members = JsonObject::new();
    members.insert("crs".to_string(), JsonValue::Object(crs));
    members
}

fn print_csv(result: &AnalysisResult) -> Result<(), AnyError> {
    let mut stdout = std::io::stdout().lock();
    writeln!(
        stdout,
        "PolygonId,Area,Volume,Positive,Negative,ReferenceAltitude,ValidCells,NodataCells,Issue"
    )?;
    for p in &result.polygons {
        let altitude = p
            .reference_altitude_used
            .map(|a| a.to_string())
            .unwrap_or_default();
        let issue = p.issue.as_ref().map(ToString::to_string).unwrap_or_default();
        writeln!(
            stdout,
            "{},{},{},{},{},{altitude},{},{},{}",
            quote(&p.polygon_id),
            p.area_m2,
            p.volume_m3,
            p.positive_volume_m3,
            p.negative_volume_m3,
            p.valid_cells,
            p.nodata_cells,
            quote(&issue),
        )?;
    }
    Ok(())
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn print_json(result: &AnalysisResult) -> Result<(), AnyError> {
    let json = serde_json::to_string_pretty(result)?;
    println!("{json}");
    Ok(())
}

/// Cut is the volume above the reference, fill the volume below it.
fn print_table<W: Write>(result: &AnalysisResult, out: &mut W) -> Result<(), AnyError> {
    writeln!(
        out,
        "{:<16} {:>12} {:>14} {:>14} {:>14} {:>10}  issue",
        "polygon", "area m²", "net m³", "cut m³", "fill m³", "ref m"
    )?;
    for p in &result.polygons {
        let altitude = p
            .reference_altitude_used
            .map(|a| format!("{a:.2}"))
            .unwrap_or_else(|| "-".to_string());
        let issue = p.issue.as_ref().map(ToString::to_string).unwrap_or_default();
        writeln!(
            out,
            "{:<16} {:>12.2} {:>14.2} {:>14.2} {:>14.2} {:>10}  {issue}",
            p.polygon_id, p.area_m2, p.volume_m3, p.positive_volume_m3, p.negative_volume_m3, altitude,
        )?;
    }
    writeln!(
        out,
        "{:<16} {:>12.2} {:>14.2} {:>14.2} {:>14.2}",
        "total",
        result.total_area_m2,
        result.total_volume_m3,
        result.total_positive_volume_m3,
        result.total_negative_volume_m3,
    )?;
    writeln!(out, "mode: {}, crs: {}", result.mode, result.crs)?;
    Ok(())
}

fn print_info(grid: &ElevationGrid, json: bool) -> Result<(), AnyError> {
    #[derive(Serialize)]
    struct GridInfo {
        rows: usize,
        cols: usize,
        crs: String,
        transform: [f64; 6],
        pixel_area: f64,
        bounds: [f64; 4],
        nodata: Option<f64>,
        min_elevation: Option<f64>,
        max_elevation: Option<f64>,
    }

    let bounds = grid.bounds();
    let info = GridInfo {
        rows: grid.rows(),
        cols: grid.cols(),
        crs: grid.crs().to_string(),
        transform: grid.transform().to_gdal(),
        pixel_area: grid.cell_area(),
        bounds: [bounds.min().x, bounds.min().y, bounds.max().x, bounds.max().y],
        nodata: grid.nodata(),
        min_elevation: grid.min_elevation(),
        max_elevation: grid.max_elevation(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "dimensions: {} x {}", info.rows, info.cols)?;
    writeln!(stdout, "crs:        {}", info.crs)?;
    writeln!(stdout, "transform:  {:?}", info.transform)?;
    writeln!(stdout, "pixel area: {}", info.pixel_area)?;
    writeln!(stdout, "bounds:     {:?}", info.bounds)?;
    writeln!(stdout, "nodata:     {:?}", info.nodata)?;
    writeln!(
        stdout,
        "elevation:  {:?} .. {:?}",
        info.min_elevation, info.max_elevation
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::print_table;
    use earthwork::{AnalysisResult, ReferenceMode};
    use elevation::Crs;

    #[test]
    fn test_table_columns() {
        let result = AnalysisResult {
            mode: ReferenceMode::ScalarAltitude,
            crs: Crs::utm(31, true),
            polygons: Vec::new(),
            total_area_m2: 100.0,
            total_volume_m3: 250.0,
            total_positive_volume_m3: 300.0,
            total_negative_volume_m3: -50.0,
        };
        let mut out = Vec::new();
        print_table(&result, &mut out).unwrap();
        let table = String::from_utf8(out).unwrap();
        let mut lines = table.lines();

        let header: Vec<&str> = lines.next().unwrap().split_whitespace().collect();
        let cut = header.iter().position(|h| *h == "cut").unwrap();
        let fill = header.iter().position(|h| *h == "fill").unwrap();
        assert!(cut < fill);

        let total: Vec<&str> = lines.next().unwrap().split_whitespace().collect();
        assert_eq!(total, ["total", "100.00", "250.00", "300.00", "-50.00"]);
    }
}
