//! Remote cache administration commands.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use dialoguer::Confirm;
use edge_cache::{EntryPreview, WarmOutcome};

use super::{DeleteArgs, InvalidateArgs, PreviewArgs, WarmArgs};
use crate::context::Context;
use crate::output::{format_bytes, format_duration, outcome_badge};

fn confirm(ctx: &Context, skip: bool, prompt: &str) -> Result<bool> {
    if skip || ctx.output.is_json() {
        return Ok(true);
    }
    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    if !confirmed {
        ctx.output.warn("Cancelled");
    }
    Ok(confirmed)
}

fn format_timestamp(ms: u64) -> String {
    match Utc.timestamp_millis_opt(ms as i64).single() {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => ms.to_string(),
    }
}

/// Soft-expire entries matching a glob or a single key.
pub async fn invalidate(args: InvalidateArgs, ctx: &Context) -> Result<()> {
    let broad = args.pattern == "*" || args.pattern == "/*";
    if broad && !confirm(ctx, args.yes, "Invalidate every cached entry?")? {
        return Ok(());
    }

    let spinner = ctx.output.spinner("Invalidating...");
    let result = ctx.admin()?.invalidate(&args.pattern).await;
    spinner.finish_and_clear();
    let result = result?;

    if ctx.output.is_json() {
        ctx.output.json(&result);
        return Ok(());
    }
    if result.invalidated == 0 {
        ctx.output
            .info(&format!("No live entries matched {}", result.pattern));
    } else {
        ctx.output.success(&format!(
            "Invalidated {} entries matching {}",
            result.invalidated, result.pattern
        ));
    }
    Ok(())
}

/// Print cache statistics.
pub async fn stats(ctx: &Context) -> Result<()> {
    let spinner = ctx.output.spinner("Fetching stats...");
    let stats = ctx.admin()?.stats().await;
    spinner.finish_and_clear();
    let stats = stats?;

    if ctx.output.is_json() {
        ctx.output.json(&stats);
        return Ok(());
    }

    ctx.output.header("Cache Statistics");
    ctx.output.kv("entries", &stats.total_entries.to_string());
    ctx.output.kv("fresh", &stats.fresh_entries.to_string());
    ctx.output.kv("stale", &stats.stale_entries.to_string());
    ctx.output.kv("compressed", &stats.compressed_entries.to_string());
    ctx.output
        .kv("stored size", &format_bytes(stats.estimated_bytes as u64));
    ctx.output.kv("indexed paths", &stats.indexed_paths.to_string());
    ctx.output.kv(
        "requests",
        &format!(
            "{} hit / {} stale / {} miss",
            stats.hits, stats.stale_hits, stats.misses
        ),
    );
    ctx.output
        .kv("hit rate", &format!("{:.1}%", stats.hit_rate * 100.0));
    Ok(())
}

fn print_preview(ctx: &Context, preview: &EntryPreview) {
    ctx.output.header(&preview.key);
    ctx.output.kv("path", &preview.path);
    ctx.output.kv("version", &preview.version.to_string());
    ctx.output.kv("created", &format_timestamp(preview.created_at));
    ctx.output.kv("expires", &format_timestamp(preview.expires_at));
    ctx.output.kv("age", &format_duration(preview.age_secs));
    if preview.expired {
        ctx.output.kv("state", "expired");
    } else {
        ctx.output.kv(
            "state",
            &format!("fresh ({} left)", format_duration(preview.remaining_ttl_secs)),
        );
    }
    ctx.output.kv(
        "size",
        &format!(
            "{}{}",
            format_bytes(preview.size_bytes as u64),
            if preview.compressed { " (gzip)" } else { "" }
        ),
    );
    if let Some(at) = preview.invalidated_at {
        ctx.output.kv("invalidated", &format_timestamp(at));
    }
    if preview.circuit_breaker_extended {
        ctx.output.kv("extended by breaker", "yes");
    }
    if let Some(etag) = &preview.etag {
        ctx.output.kv("etag", etag);
    }
    for (name, value) in &preview.headers {
        ctx.output.kv(name, value);
    }
    if let Some(content) = &preview.content {
        println!("\n{}", content);
    }
}

/// Show stored entries for a path or a single key.
pub async fn preview(args: PreviewArgs, ctx: &Context) -> Result<()> {
    let admin = ctx.admin()?;
    let spinner = ctx.output.spinner("Loading entries...");
    let previews = match (&args.key, &args.path) {
        (Some(key), _) => admin
            .preview_key(key, args.content)
            .await
            .map(|preview| vec![preview]),
        (None, Some(path)) => admin.preview_path(path, args.version, args.content).await,
        (None, None) => Ok(Vec::new()),
    };
    spinner.finish_and_clear();
    let previews = previews?;

    if ctx.output.is_json() {
        ctx.output.json(&previews);
        return Ok(());
    }
    if previews.is_empty() {
        ctx.output.info("No cached entries");
        return Ok(());
    }
    for preview in &previews {
        print_preview(ctx, preview);
    }
    Ok(())
}

/// Warm a list of paths.
pub async fn warm(args: WarmArgs, ctx: &Context) -> Result<()> {
    let spinner = ctx
        .output
        .spinner(&format!("Warming {} paths...", args.paths.len()));
    let report = ctx.admin()?.warm(args.paths, args.version).await;
    spinner.finish_and_clear();
    let report = report?;

    if ctx.output.is_json() {
        ctx.output.json(&report);
        return Ok(());
    }

    ctx.output.header("Warm Report");
    let width = report
        .results
        .iter()
        .map(|r| r.path.len())
        .max()
        .unwrap_or(0);
    for result in &report.results {
        let detail = match &result.outcome {
            WarmOutcome::Failed(reason) => reason.as_str(),
            _ => "",
        };
        let badge = outcome_badge(&result.outcome);
        ctx.output
            .table_row(&[result.path.as_str(), badge.as_str(), detail], &[width, 14, 0]);
    }

    let failed = report.failed();
    if failed > 0 {
        ctx.output.warn(&format!(
            "{} warmed, {} failed",
            report.warmed(),
            failed
        ));
    } else {
        ctx.output
            .success(&format!("{} paths warmed", report.warmed()));
    }
    Ok(())
}

/// Hard-delete one entry.
pub async fn delete(args: DeleteArgs, ctx: &Context) -> Result<()> {
    edge_cache::ParsedCacheKey::parse(&args.key)?;
    if !confirm(ctx, args.yes, &format!("Delete {}?", args.key))? {
        return Ok(());
    }

    let result = ctx.admin()?.delete(&args.key).await?;
    if ctx.output.is_json() {
        ctx.output.json(&result);
        return Ok(());
    }
    if result.deleted {
        ctx.output.success(&format!("Deleted {}", result.key));
    } else {
        ctx.output.warn(&format!("No entry at {}", result.key));
    }
    Ok(())
}
