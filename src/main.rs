use std::path::{Path, PathBuf};
use std::process::ExitCode;

use alsdoctor::als::codec;
use alsdoctor::composer::{self, CompositionPlan, TrackSpec};
use alsdoctor::config::AppConfig;
use alsdoctor::devices::{DeviceCategory, DeviceLibrary};
use alsdoctor::structure::{self, StructureRegistry};
use alsdoctor::validator::{self, ValidationResult};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "alsdoctor", version, about = "Ableton Live Set integrity checker and composer")]
struct Cli {
    /// Path to the device library index
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check one .als file for structural and id problems
    Validate {
        path: PathBuf,

        /// Also print warnings
        #[arg(long)]
        warnings: bool,

        /// Print an id summary
        #[arg(long)]
        ids: bool,
    },

    /// Validate every .als file under the given directories
    Scan {
        /// Directories to scan (defaults to config file project_dirs)
        paths: Vec<PathBuf>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Include sets in Ableton Backup folders
        #[arg(long)]
        include_backups: bool,

        /// Also print warnings
        #[arg(long)]
        warnings: bool,
    },

    /// Store every device of a project in the library
    Extract {
        project: PathBuf,

        /// Replace templates with the same name instead of suffixing
        #[arg(long)]
        overwrite: bool,
    },

    /// List library templates
    Devices {
        #[arg(short, long)]
        category: Option<DeviceCategory>,
    },

    /// Remove a template from the library
    Forget { name: String },

    /// List song-structure presets
    Structures,

    /// Build a new arrangement from a base set's first MIDI and audio tracks
    Compose {
        base: PathBuf,
        output: PathBuf,

        /// Structure preset (defaults to config composer.default_genre)
        #[arg(short, long)]
        genre: Option<String>,

        /// Track as NAME[:midi|audio[:COLOR]], repeatable (default: the
        /// standard eight-track layout)
        #[arg(short, long = "track")]
        tracks: Vec<TrackSpec>,

        /// Library device for a track as TRACK=DEVICE, repeatable
        #[arg(short, long = "device", value_parser = parse_assignment)]
        devices: Vec<(String, String)>,

        /// Tempo in BPM (defaults to the preset's)
        #[arg(long, conflicts_with = "keep_tempo")]
        tempo: Option<f64>,

        /// Leave the base set's tempo alone
        #[arg(long)]
        keep_tempo: bool,

        /// Save even if the result fails validation
        #[arg(long)]
        force: bool,
    },
}

fn parse_assignment(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((track, device)) if !track.trim().is_empty() && !device.trim().is_empty() => {
            Ok((track.trim().to_string(), device.trim().to_string()))
        }
        _ => Err(format!("expected TRACK=DEVICE, got {s:?}")),
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = AppConfig::load().context("Invalid config file")?;
    let structures =
        StructureRegistry::new(&config.custom_structures).context("Invalid structure in config")?;

    // Resolve library path: CLI > config > XDG default
    let library_path = cli.library.clone().unwrap_or_else(|| config.library_path());
    log::info!("Device library: {}", library_path.display());

    match cli.command {
        Commands::Validate { path, warnings, ids } => {
            let doc = match codec::load(&path) {
                Ok(doc) => doc,
                Err(e) => {
                    println!("[FAIL] {}", path.display());
                    println!("  error: {e}");
                    return Ok(ExitCode::FAILURE);
                }
            };
            let result = validator::validate(&doc);
            print_result(&path, &result, warnings);
            if ids {
                print_id_summary(&result);
            }
            return Ok(exit_code(result.is_valid()));
        }

        Commands::Scan {
            paths,
            jobs,
            include_backups,
            warnings,
        } => {
            // Resolve scan paths: CLI args > config project_dirs
            let scan_paths = if !paths.is_empty() {
                paths
            } else if !config.project_dirs.is_empty() {
                config.project_dirs.clone()
            } else {
                anyhow::bail!(
                    "No directories to scan. Pass paths as arguments or set project_dirs in config."
                );
            };

            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let library = if library_path.exists() {
                Some(DeviceLibrary::open(&library_path).context("Failed to open device library")?)
            } else {
                None
            };

            let result = alsdoctor::scanner::scan(
                &scan_paths,
                workers,
                include_backups || config.include_backups,
                library.as_ref(),
            )
            .context("Scan failed")?;

            for report in &result.reports {
                match &report.outcome {
                    Ok(r) => {
                        if !r.is_valid() || warnings {
                            print_result(&report.path, r, warnings);
                        }
                    }
                    Err(e) => {
                        println!("[FAIL] {}", report.path.display());
                        println!("  error: {e}");
                    }
                }
                if !report.unknown_devices.is_empty() {
                    println!(
                        "  not in library: {}",
                        report.unknown_devices.join(", ")
                    );
                }
            }

            println!(
                "Scan complete: {} scanned, {} valid, {} invalid, {} unreadable",
                result.scanned, result.valid, result.invalid, result.unreadable
            );
            return Ok(exit_code(result.all_valid()));
        }

        Commands::Extract { project, overwrite } => {
            let doc = codec::load(&project)
                .with_context(|| format!("Failed to load {}", project.display()))?;
            let mut library =
                DeviceLibrary::open(&library_path).context("Failed to open device library")?;
            let stored = library
                .import_project(&doc, &project, overwrite)
                .context("Failed to store devices")?;

            for name in &stored {
                println!("  {name}");
            }
            println!(
                "Extract complete: {} devices stored, library has {}",
                stored.len(),
                library.len()
            );
        }

        Commands::Devices { category } => {
            let library =
                DeviceLibrary::open(&library_path).context("Failed to open device library")?;
            if library.is_empty() {
                println!("Library is empty. Run `alsdoctor extract <project>` first.");
                return Ok(ExitCode::SUCCESS);
            }

            println!("{:<32} {:<24} {:<10}", "Name", "Type", "Category");
            let mut shown = 0;
            for (name, device) in library.iter() {
                if category.is_some_and(|c| c != device.category) {
                    continue;
                }
                println!(
                    "{:<32} {:<24} {:<10}",
                    truncate(name, 32),
                    truncate(&device.device_type, 24),
                    device.category
                );
                shown += 1;
            }
            println!();
            println!("{shown} of {} templates", library.len());
        }

        Commands::Forget { name } => {
            let mut library =
                DeviceLibrary::open(&library_path).context("Failed to open device library")?;
            if library.remove(&name).context("Failed to update device library")? {
                println!("Removed {name}");
            } else {
                println!("No template named \"{name}\".");
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Structures => {
            for preset in structures.presets() {
                let names: Vec<_> = preset.sections.iter().map(|s| s.name.as_str()).collect();
                println!(
                    "{:<14} {:>5} BPM {:>4} bars  {}",
                    preset.name,
                    preset.bpm,
                    preset.total_bars(),
                    names.join(" / ")
                );
            }
        }

        Commands::Compose {
            base,
            output,
            genre,
            tracks,
            devices,
            tempo,
            keep_tempo,
            force,
        } => {
            let genre = genre.unwrap_or_else(|| config.composer.default_genre.clone());
            let preset = structures
                .get(&genre)
                .with_context(|| format!("Unknown structure preset: {genre}"))?;

            let mut tracks = if tracks.is_empty() {
                structure::default_tracks()
            } else {
                tracks
            };
            for (track, device) in devices {
                let spec = tracks
                    .iter_mut()
                    .find(|t| t.name == track)
                    .with_context(|| format!("--device names unknown track {track:?}"))?;
                spec.devices.push(device);
            }

            let plan = CompositionPlan {
                sections: preset.sections(),
                tempo: if keep_tempo { None } else { Some(tempo.unwrap_or(preset.bpm)) },
                tracks,
            };

            let needs_library = plan.tracks.iter().any(|t| !t.devices.is_empty());
            let library = if needs_library {
                Some(DeviceLibrary::open(&library_path).context("Failed to open device library")?)
            } else {
                None
            };

            let mut doc = codec::load(&base)
                .with_context(|| format!("Failed to load {}", base.display()))?;
            let summary = composer::compose(
                &mut doc,
                &plan,
                library.as_ref(),
                &config.composer.options(),
            )
            .context("Compose failed")?;

            for (track, device) in &summary.missing_devices {
                println!("  skipped device {device} on {track} (not in library)");
            }

            let result = validator::validate(&doc);
            if !result.is_valid() {
                print_result(&output, &result, true);
                if !force {
                    println!("Not saved. Re-run with --force to write it anyway.");
                    return Ok(ExitCode::FAILURE);
                }
            }

            codec::save(&doc, &output)
                .with_context(|| format!("Failed to save {}", output.display()))?;
            println!(
                "Compose complete: {} tracks, {} locators ({}), NextPointeeId {}, saved to {}",
                summary.tracks_created,
                summary.locators,
                preset.name,
                summary.next_pointee_id,
                output.display()
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn exit_code(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn print_result(path: &Path, result: &ValidationResult, warnings: bool) {
    let tag = if result.is_valid() { "[OK]" } else { "[FAIL]" };
    println!("{tag} {}", path.display());
    for issue in &result.errors {
        println!("  error: {issue}");
    }
    if warnings {
        for issue in &result.warnings {
            println!("  warning: {issue}");
        }
    }
}

fn print_id_summary(result: &ValidationResult) {
    let Some(graph) = &result.graph else {
        println!("  ids: not analyzed");
        return;
    };
    let counter = graph
        .next_pointee_id
        .map_or_else(|| "missing".to_string(), |n| n.to_string());
    let max = graph
        .max_numeric_id
        .map_or_else(|| "none".to_string(), |n| n.to_string());
    println!(
        "  ids: {} total, {} unique, {} duplicated, max {}, NextPointeeId {}",
        graph.id_occurrences,
        graph.all_ids.len(),
        graph.duplicates.len(),
        max,
        counter
    );
    if !graph.unrecognized_references.is_empty() {
        let tags: Vec<_> = graph.unrecognized_references.iter().map(String::as_str).collect();
        println!("  unchecked reference tags: {}", tags.join(", "));
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_assignment_parsing() {
        assert_eq!(
            parse_assignment("Kick = Glue"),
            Ok(("Kick".to_string(), "Glue".to_string()))
        );
        assert!(parse_assignment("Kick").is_err());
        assert!(parse_assignment("=Glue").is_err());
    }

    #[test]
    fn truncate_is_char_aware() {
        assert_eq!(truncate("Reverb", 10), "Reverb");
        assert_eq!(truncate("Überkompressor", 5), "Über…");
    }

    #[test]
    fn cli_parses_compose() {
        let cli = Cli::try_parse_from([
            "alsdoctor",
            "compose",
            "base.als",
            "out.als",
            "--track",
            "Kick:midi:69",
            "--device",
            "Kick=Glue",
            "--keep-tempo",
        ])
        .unwrap();
        match cli.command {
            Commands::Compose { tracks, devices, keep_tempo, .. } => {
                assert_eq!(tracks[0].name, "Kick");
                assert_eq!(devices, vec![("Kick".to_string(), "Glue".to_string())]);
                assert!(keep_tempo);
            }
            _ => panic!("expected compose"),
        }
    }

    #[test]
    fn tempo_and_keep_tempo_conflict() {
        let parsed = Cli::try_parse_from([
            "alsdoctor", "compose", "a.als", "b.als", "--tempo", "138", "--keep-tempo",
        ]);
        assert!(parsed.is_err());
    }
}
