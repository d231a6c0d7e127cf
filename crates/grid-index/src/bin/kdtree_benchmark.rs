//! Benchmark k-d tree build and lookup on a synthetic curvilinear grid.
//!
//! This tool:
//! 1. Generates a rotated grid of the requested size
//! 2. Builds the index and checks its structure
//! 3. Times exact, approximate and cell lookups over a lattice of queries
//! 4. Builds a pixel index for a GetMap-style bounding box
//!
//! Query parameters come from the GRID_INDEX_* environment variables.
//!
//! Run with: cargo run --release --bin kdtree-benchmark -- --ni 720 --nj 360

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use grid_index::{verify_tree, IndexConfig, KdTreeGrid};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wms_common::{BoundingBox, CurvilinearGrid, LatLon};

#[derive(Parser, Debug)]
#[command(name = "kdtree-benchmark")]
#[command(about = "Benchmark the curvilinear grid spatial index")]
struct Args {
    /// Cells along the i axis
    #[arg(long, default_value_t = 360)]
    ni: usize,

    /// Cells along the j axis
    #[arg(long, default_value_t = 180)]
    nj: usize,

    /// Rotation of the grid axes in degrees
    #[arg(long, default_value_t = 30.0)]
    rotation: f64,

    /// Spacing between cell centres in degrees
    #[arg(long, default_value_t = 0.25)]
    spacing: f64,

    /// Queries per axis of the query lattice
    #[arg(long, default_value_t = 200)]
    queries: usize,

    /// Pixel index bounding box as minx,miny,maxx,maxy (default: grid extent)
    #[arg(long)]
    bbox: Option<String>,

    /// Pixel index width
    #[arg(long, default_value_t = 256)]
    width: usize,

    /// Pixel index height
    #[arg(long, default_value_t = 256)]
    height: usize,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true);
    if args.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    let config = IndexConfig::from_env();
    config.validate()?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("K-d Tree Benchmark");
    println!("==================\n");

    println!(
        "Generating rotated grid ({} x {}, {} deg spacing, {} deg rotation)...",
        args.ni, args.nj, args.spacing, args.rotation
    );
    let grid = Arc::new(generate_rotated_grid(
        args.ni,
        args.nj,
        args.spacing,
        args.rotation,
    )?);
    let extent = grid.bbox().context("grid has no finite cell centres")?;
    println!("  Cells: {}", grid.size());
    println!(
        "  Extent: [{:.2}, {:.2}, {:.2}, {:.2}]\n",
        extent.min_x, extent.min_y, extent.max_x, extent.max_y
    );

    let start = Instant::now();
    let lookup = KdTreeGrid::new(grid.clone(), &config)?;
    let build_ms = start.elapsed().as_secs_f64() * 1000.0;

    let tree = lookup.tree();
    println!("Build:");
    println!("{:-<60}", "");
    println!("  Points:        {}", tree.len());
    println!("  Slots:         {}", tree.slot_count());
    println!("  Depth:         {}", tree.depth());
    println!("  Max distance:  {:.4} deg", lookup.max_distance());
    println!("  Time:          {:.2} ms\n", build_ms);

    let violations = verify_tree(tree);
    if violations.is_empty() {
        info!("Tree structure verified");
    } else {
        warn!(count = violations.len(), first = ?violations[0], "Tree structure violations");
    }

    let queries = query_lattice(&extent, args.queries);

    println!("Queries ({}):", queries.len());
    println!("{:-<60}", "");
    println!("{:<25} {:>15} {:>15}", "Method", "Total (ms)", "Per query (us)");
    println!("{:-<60}", "");

    let start = Instant::now();
    for q in &queries {
        tree.nearest_neighbour(q.lat, q.lon)?;
    }
    print_timing("nearest_neighbour", start, queries.len());

    tree.reset_approx_query_stats();
    let start = Instant::now();
    for q in &queries {
        tree.approx_nearest_neighbour(q.lat, q.lon, lookup.max_distance())?;
    }
    print_timing("approx_nearest_neighbour", start, queries.len());

    let start = Instant::now();
    let mut found = 0usize;
    for q in &queries {
        if lookup.find_nearest_grid_point(q.lon, q.lat).is_some() {
            found += 1;
        }
    }
    print_timing("find_nearest_grid_point", start, queries.len());

    let start = Instant::now();
    let batch = lookup.find_nearest_grid_points(&queries);
    print_timing("find_nearest_grid_points", start, queries.len());
    println!("{:-<60}", "");
    println!(
        "  Inside grid: {} / {} ({} in batch)\n",
        found,
        queries.len(),
        batch.iter().flatten().count()
    );

    tree.log_approx_query_stats();

    let bbox = match &args.bbox {
        Some(s) => BoundingBox::from_wms_string(s)?,
        None => extent,
    };
    if !bbox.intersects(&extent) {
        warn!(?bbox, ?extent, "Pixel index bbox does not overlap the grid");
    }
    let start = Instant::now();
    let pixels = lookup.pixel_index(&bbox, args.width, args.height);
    let pixel_ms = start.elapsed().as_secs_f64() * 1000.0;
    let covered = pixels.iter().filter(|p| p.is_some()).count();
    println!("Pixel index ({} x {}):", args.width, args.height);
    println!("{:-<60}", "");
    println!("  Covered pixels: {} / {}", covered, pixels.len());
    println!("  Time:           {:.2} ms", pixel_ms);

    info!(
        cells = grid.size(),
        build_ms,
        pixel_ms,
        covered,
        "Benchmark complete"
    );

    Ok(())
}

/// Regular grid rotated about its first cell, centred near the origin.
fn generate_rotated_grid(
    ni: usize,
    nj: usize,
    spacing: f64,
    rotation_deg: f64,
) -> Result<CurvilinearGrid> {
    let (sin, cos) = rotation_deg.to_radians().sin_cos();
    let lon0 = -(ni as f64) * spacing / 2.0;
    let lat0 = -(nj as f64) * spacing / 2.0;

    let mut lons = Vec::with_capacity(ni * nj);
    let mut lats = Vec::with_capacity(ni * nj);
    for j in 0..nj {
        for i in 0..ni {
            let (x, y) = (i as f64 * spacing, j as f64 * spacing);
            lons.push(lon0 + x * cos - y * sin);
            lats.push((lat0 + x * sin + y * cos).clamp(-90.0, 90.0));
        }
    }

    Ok(CurvilinearGrid::new(ni, nj, lons, lats)?)
}

/// `n` x `n` evenly spaced positions covering `bbox`.
fn query_lattice(bbox: &BoundingBox, n: usize) -> Vec<LatLon> {
    let mut queries = Vec::with_capacity(n * n);
    for row in 0..n {
        for col in 0..n {
            let (lon, lat) = bbox.pixel_centre(col, row, n, n);
            queries.push(LatLon::new(lat, lon));
        }
    }
    queries
}

fn print_timing(name: &str, start: Instant, count: usize) {
    let total_ms = start.elapsed().as_secs_f64() * 1000.0;
    let per_query_us = if count == 0 {
        0.0
    } else {
        total_ms * 1000.0 / count as f64
    };
    println!("{:<25} {:>15.2} {:>15.3}", name, total_ms, per_query_us);
}
