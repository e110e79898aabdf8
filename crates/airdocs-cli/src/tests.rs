#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use chrono::{TimeZone, Utc};
    use clap::error::ErrorKind;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn test_layout() -> UpdateLayout {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|value| value.as_nanos())
            .unwrap_or(0);
        let root = std::env::temp_dir().join(format!(
            "airdocs-cli-test-{}-{nanos}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        UpdateLayout::new(root.join("AirDocs"), root.join("user"))
    }

    fn sample_release() -> ReleaseInfo {
        ReleaseInfo {
            version: Version::new(1, 3, 0),
            download_url: "https://updates.example.test/airdocs-1.3.0.tar.gz".to_string(),
            sha256: None,
            size_bytes: 2048,
            release_date: "2026-09-01".to_string(),
            release_notes: "Faster exports\nFixed printing".to_string(),
            channel: Channel::Stable,
        }
    }

    #[test]
    fn render_status_line_plain_is_the_bare_message() {
        assert_eq!(
            render_status_line(OutputStyle::Plain, "ok", "AirDocs updated"),
            "AirDocs updated"
        );
    }

    #[test]
    fn render_status_line_rich_prefixes_badge() {
        assert_eq!(
            render_status_line(OutputStyle::Rich, "ok", "AirDocs updated"),
            "[OK] AirDocs updated"
        );
        assert_eq!(
            render_status_line(OutputStyle::Rich, "warn", "postponed"),
            "[WARN] postponed"
        );
    }

    #[test]
    fn resolve_output_style_follows_stdout_tty() {
        assert_eq!(resolve_output_style(true, false), OutputStyle::Rich);
        assert_eq!(resolve_output_style(false, true), OutputStyle::Plain);
        assert_eq!(resolve_output_style_for(true), OutputStyle::Plain);
    }

    #[test]
    fn progress_line_is_suppressed_in_plain_mode() {
        assert!(render_progress_line(OutputStyle::Plain, "download", 1, 2, None).is_none());
    }

    #[test]
    fn progress_line_reports_percent_and_elapsed() {
        let line = render_progress_line(
            OutputStyle::Rich,
            "download",
            512,
            1024,
            Some(Duration::from_millis(1_250)),
        )
        .expect("rich mode must render");
        assert!(line.contains(" 50% "), "unexpected line: {line}");
        assert!(line.ends_with(" complete in 1.250s"), "unexpected line: {line}");
    }

    #[test]
    fn section_header_only_in_interactive_mode() {
        assert_eq!(render_section_header(UiMode::Plain, "downloading"), None);
        assert_eq!(
            render_section_header(UiMode::Interactive, "downloading").as_deref(),
            Some("== downloading ==")
        );
    }

    #[test]
    fn parse_confirmation_accepts_yes_variants_only() {
        assert!(parse_confirmation("y\n"));
        assert!(parse_confirmation(" YES "));
        assert!(!parse_confirmation("\n"));
        assert!(!parse_confirmation("no"));
        assert!(!parse_confirmation("yess"));
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "airdocs-update",
            "install",
            "--yes",
            "--channel",
            "latest",
            "--app-dir",
            "/opt/AirDocs",
            "--plain",
        ])
        .expect("must parse");
        assert!(matches!(cli.command, Commands::Install { yes: true }));
        assert_eq!(cli.channel, Some(CliChannel::Latest));
        assert_eq!(cli.app_dir, Some(PathBuf::from("/opt/AirDocs")));
        assert!(cli.plain);
    }

    #[test]
    fn cli_history_limit_defaults_to_twenty() {
        let cli = Cli::try_parse_from(["airdocs-update", "history"]).expect("must parse");
        assert!(matches!(cli.command, Commands::History { limit: 20 }));
    }

    #[test]
    fn cli_rejects_unknown_channel() {
        let err = Cli::try_parse_from(["airdocs-update", "check", "--channel", "nightly"])
            .expect_err("unknown channel must fail");
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn cli_channel_maps_to_core_channel() {
        assert_eq!(Channel::from(CliChannel::Latest), Channel::Latest);
        assert_eq!(Channel::from(CliChannel::Stable), Channel::Stable);
    }

    #[test]
    fn release_lines_mark_unverified_packages() {
        let lines = format_release_lines(&sample_release(), "1.2.0", OutputStyle::Plain);
        assert_eq!(
            lines[0],
            "AirDocs 1.3.0 is available (running 1.2.0, stable channel)"
        );
        assert!(lines.contains(&"released: 2026-09-01".to_string()));
        assert!(lines.contains(&"sha256: not published (unverified)".to_string()));
        assert!(lines.contains(&"  Fixed printing".to_string()));
    }

    #[test]
    fn fatal_startup_report_names_both_directories() {
        let report = StartupReport::FatalRollback {
            app_dir: PathBuf::from("/opt/AirDocs"),
            app_dir_old: PathBuf::from("/opt/AirDocs_old"),
            message: "rename failed".to_string(),
        };
        let lines = format_startup_report(&report, OutputStyle::Rich);
        assert!(lines[0].starts_with("[ERROR] "));
        let joined = lines.join("\n");
        assert!(joined.contains("/opt/AirDocs_old"));
        assert!(joined.contains("expected location: /opt/AirDocs"));
        assert!(joined.contains("rename failed"));
    }

    #[test]
    fn rolled_back_report_includes_reason() {
        let report = StartupReport::RolledBack {
            version: "1.3.0".to_string(),
            error: "entry executable missing".to_string(),
        };
        let lines = format_startup_report(&report, OutputStyle::Plain);
        assert_eq!(
            lines,
            vec![
                "update to 1.3.0 failed; previous version restored".to_string(),
                "reason: entry executable missing".to_string(),
            ]
        );
    }

    #[test]
    fn history_lines_show_outcome_and_error() {
        let installed_at = Utc
            .with_ymd_and_hms(2026, 9, 2, 8, 30, 0)
            .single()
            .expect("must build timestamp");
        let records = vec![
            UpdateHistoryRecord {
                version: "1.3.0".to_string(),
                previous_version: "1.2.0".to_string(),
                channel: Channel::Stable,
                install_method: InstallMethod::Auto,
                download_size: 2048,
                download_duration: 0,
                install_success: false,
                error_message: Some("copy failed".to_string()),
                rollback_occurred: true,
                installed_at,
            },
            UpdateHistoryRecord {
                version: "1.2.0".to_string(),
                previous_version: "1.1.0".to_string(),
                channel: Channel::Stable,
                install_method: InstallMethod::Manual,
                download_size: 1024,
                download_duration: 0,
                install_success: true,
                error_message: None,
                rollback_occurred: false,
                installed_at,
            },
        ];

        let lines = format_history_lines(&records, OutputStyle::Rich);
        assert_eq!(
            lines[0],
            "[WARN] 2026-09-02 08:30:00 1.2.0 -> 1.3.0 rolled back (stable, auto): copy failed"
        );
        assert_eq!(
            lines[1],
            "[OK] 2026-09-02 08:30:00 1.1.0 -> 1.2.0 installed (stable, manual)"
        );
    }

    #[test]
    fn status_lines_report_missing_source_and_no_staged_update() {
        let layout = test_layout();
        let config = UpdaterConfig::default();
        let lines = format_status_lines(&layout, &config, "1.2.0", None);
        assert!(lines.contains(&"version: 1.2.0".to_string()));
        assert!(lines.contains(&"source: not configured".to_string()));
        assert!(lines.contains(&"staged: none".to_string()));
    }

    #[test]
    fn doctor_lines_report_missing_installation() {
        let layout = test_layout();
        let lines = doctor_lines(&layout, &UpdaterConfig::default());
        assert!(lines[0].contains("unhealthy"), "unexpected line: {}", lines[0]);
        assert!(lines.iter().any(|line| line.ends_with("(absent)")));
        assert!(lines.iter().any(|line| line.ends_with("(not found; using defaults)")));
    }

    #[test]
    fn completion_scripts_are_generated_for_every_shell() {
        for shell in [
            CliCompletionShell::Bash,
            CliCompletionShell::Zsh,
            CliCompletionShell::Fish,
            CliCompletionShell::Powershell,
        ] {
            let mut output = Vec::new();
            write_completions_script(shell, &mut output).expect("must generate completions");
            let script = String::from_utf8(output).expect("completions must be utf-8");
            assert!(script.contains("airdocs-update"), "{shell:?} script lacks binary name");
        }
    }
}
