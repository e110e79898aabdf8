struct Session {
    layout: UpdateLayout,
    config: UpdaterConfig,
    updater: Updater,
    renderer: TerminalRenderer,
    _log_guard: tracing_appender::non_blocking::WorkerGuard,
}

fn run_cli(cli: Cli) -> Result<ExitCode> {
    if let Commands::Completions { shell } = cli.command {
        let mut stdout = io::stdout().lock();
        write_completions_script(shell, &mut stdout)?;
        return Ok(ExitCode::SUCCESS);
    }

    let session = open_session(&cli)?;
    match cli.command {
        Commands::Check => run_check_command(&session),
        Commands::Install { yes } => run_install_command(&session, yes),
        Commands::Apply => run_startup_command(&session, InstallMethod::Manual, false),
        Commands::Startup => run_startup_command(&session, InstallMethod::Auto, true),
        Commands::Status => {
            session.renderer.print_lines(&format_status_lines(
                &session.layout,
                &session.config,
                &session.updater.current_version().to_string(),
                session.updater.pending().as_ref(),
            ));
            Ok(ExitCode::SUCCESS)
        }
        Commands::History { limit } => {
            let records = read_history(&session.layout, limit)?;
            if records.is_empty() {
                println!("No update history");
            } else {
                session
                    .renderer
                    .print_lines(&format_history_lines(&records, session.renderer.style()));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::ClearPending => {
            match session.updater.clear_pending()? {
                Some(pending) => session.renderer.print_status(
                    "ok",
                    &format!("cleared staged update {}", pending.version),
                ),
                None => println!("No staged update"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Doctor => {
            session
                .renderer
                .print_lines(&doctor_lines(&session.layout, &session.config));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn open_session(cli: &Cli) -> Result<Session> {
    let app_dir = match &cli.app_dir {
        Some(app_dir) => app_dir.clone(),
        None => current_exe_dir()?,
    };
    let user_dir = match &cli.user_dir {
        Some(user_dir) => user_dir.clone(),
        None => default_user_dir()?,
    };
    let layout = UpdateLayout::new(app_dir, user_dir);
    layout.ensure_base_dirs()?;
    let log_guard = init_logging(&layout, "warn")?;

    let mut config = UpdaterConfig::load(&layout.config_path())?;
    if let Some(channel) = cli.channel {
        config.channel = channel.into();
    }

    let current_version = parse_version(
        cli.current_version
            .as_deref()
            .unwrap_or(env!("CARGO_PKG_VERSION")),
    )?;
    let source = build_release_source(&config)?;
    tracing::debug!(
        app_dir = %layout.app_dir().display(),
        user_dir = %layout.user_dir().display(),
        channel = %config.channel,
        "opened update session"
    );
    let updater = Updater::new(
        config.clone(),
        layout.clone(),
        current_version,
        source,
        history_sink(&layout),
    )?;

    Ok(Session {
        layout,
        config,
        updater,
        renderer: TerminalRenderer::from_style(resolve_output_style_for(cli.plain)),
        _log_guard: log_guard,
    })
}

fn current_exe_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to locate the running executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("executable has no parent directory: {}", exe.display()))
}

#[cfg(feature = "sqlite")]
fn history_sink(layout: &UpdateLayout) -> Arc<dyn HistorySink> {
    Arc::new(airdocs_installer::SqliteHistory::new(layout.database_path()))
}

#[cfg(not(feature = "sqlite"))]
fn history_sink(layout: &UpdateLayout) -> Arc<dyn HistorySink> {
    Arc::new(JsonlHistory::new(layout.history_path()))
}

/// Newest first.
#[cfg(feature = "sqlite")]
fn read_history(layout: &UpdateLayout, limit: usize) -> Result<Vec<UpdateHistoryRecord>> {
    airdocs_installer::SqliteHistory::new(layout.database_path()).recent(limit)
}

/// Newest first.
#[cfg(not(feature = "sqlite"))]
fn read_history(layout: &UpdateLayout, limit: usize) -> Result<Vec<UpdateHistoryRecord>> {
    let mut records = JsonlHistory::new(layout.history_path()).read_all()?;
    records.reverse();
    records.truncate(limit);
    Ok(records)
}

fn run_check_command(session: &Session) -> Result<ExitCode> {
    if session.config.source.is_none() {
        session.renderer.print_status(
            "warn",
            &format!(
                "no release source configured; add a [source] table to {}",
                session.layout.config_path().display()
            ),
        );
        return Ok(ExitCode::SUCCESS);
    }

    let current = session.updater.current_version();
    match session.updater.check() {
        Some(release) => session
            .renderer
            .print_lines(&format_release_lines(&release, &current.to_string(), session.renderer.style())),
        None => session.renderer.print_status(
            "ok",
            &format!(
                "AirDocs {current} is up to date ({} channel)",
                session.config.channel
            ),
        ),
    }
    Ok(ExitCode::SUCCESS)
}

fn run_install_command(session: &Session, yes: bool) -> Result<ExitCode> {
    let current = session.updater.current_version();
    if let Some(pending) = session.updater.pending() {
        session.renderer.print_status(
            "warn",
            &format!(
                "AirDocs {} is already staged; run `airdocs-update apply` or `airdocs-update clear-pending`",
                pending.version
            ),
        );
        return Ok(ExitCode::SUCCESS);
    }

    let Some(release) = session.updater.check() else {
        session.renderer.print_status(
            "ok",
            &format!("AirDocs {current} is up to date ({} channel)", session.config.channel),
        );
        return Ok(ExitCode::SUCCESS);
    };
    session
        .renderer
        .print_lines(&format_release_lines(&release, &current.to_string(), session.renderer.style()));

    if !yes && !confirm(&format!("Install AirDocs {}?", release.version))? {
        println!("Install cancelled");
        return Ok(ExitCode::SUCCESS);
    }

    let pending = stage_with_progress(session, &release)?;
    session.renderer.print_status(
        "ok",
        &format!(
            "AirDocs {} staged; it will be installed the next time AirDocs starts",
            pending.version
        ),
    );
    Ok(ExitCode::SUCCESS)
}

fn confirm(question: &str) -> Result<bool> {
    if !io::stdin().is_terminal() {
        return Err(anyhow!(
            "refusing to install without confirmation; rerun with --yes"
        ));
    }
    print!("{question} [y/N] ");
    io::stdout().flush().context("failed to flush prompt")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(parse_confirmation(&answer))
}

fn parse_confirmation(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Runs staging on a worker thread while this thread renders its events.
fn stage_with_progress(session: &Session, release: &ReleaseInfo) -> Result<PendingUpdate> {
    let events = session.updater.subscribe();
    let cancel = CancelToken::new();

    let outcome = thread::scope(|scope| {
        let worker = scope.spawn(|| session.updater.stage(release, &cancel));
        let mut view = StageView::new(session.renderer);
        loop {
            match events.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => view.handle(event),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if worker.is_finished() {
                        break;
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        for event in events.try_iter() {
            view.handle(event);
        }
        let outcome = worker.join();
        view.finish(matches!(outcome, Ok(Ok(_))));
        outcome
    });

    let staged = outcome.map_err(|_| anyhow!("update worker panicked"))?;
    staged.with_context(|| format!("failed to stage AirDocs {}", release.version))
}

fn run_startup_command(
    session: &Session,
    method: InstallMethod,
    background_check: bool,
) -> Result<ExitCode> {
    let report = session.updater.run_startup(method);
    let lines = format_startup_report(&report, session.renderer.style());
    if matches!(report, StartupReport::FatalRollback { .. }) {
        for line in &lines {
            eprintln!("{line}");
        }
        return Ok(ExitCode::from(EXIT_FATAL_ROLLBACK));
    }
    session.renderer.print_lines(&lines);

    if background_check {
        if let Some(release) = session.updater.startup_check() {
            let current = session.updater.current_version().to_string();
            session.renderer.print_lines(&format_release_lines(
                &release,
                &current,
                session.renderer.style(),
            ));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn doctor_lines(layout: &UpdateLayout, config: &UpdaterConfig) -> Vec<String> {
    let app_state = match airdocs_installer::verify_installation(
        layout.app_dir(),
        &config.install_check(),
    ) {
        Ok(()) => "ok".to_string(),
        Err(err) => format!("unhealthy: {err}"),
    };
    let backup_state = if layout.app_dir_old().exists() {
        "present; an interrupted update will be settled on next start"
    } else {
        "absent"
    };
    let config_state = if layout.config_path().exists() {
        "found"
    } else {
        "not found; using defaults"
    };
    let ledger_state = match PendingLedger::for_layout(layout).try_read() {
        Ok(Some(pending)) => format!("staged {}", pending.version),
        Ok(None) => "none".to_string(),
        Err(err) => format!("unreadable: {err}"),
    };
    let journal_state = match ApplyJournal::for_layout(layout).entries() {
        Ok(entries) if entries.is_empty() => "clean".to_string(),
        Ok(entries) => format!("{} entries from an unfinished apply", entries.len()),
        Err(err) => format!("unreadable: {err:#}"),
    };

    vec![
        format!("app dir: {} ({app_state})", layout.app_dir().display()),
        format!("backup dir: {} ({backup_state})", layout.app_dir_old().display()),
        format!("user dir: {}", layout.user_dir().display()),
        format!("config: {} ({config_state})", layout.config_path().display()),
        format!("source: {}", format_source(config)),
        format!("ledger: {} ({ledger_state})", layout.ledger_path().display()),
        format!("journal: {} ({journal_state})", layout.journal_path().display()),
        format!("cache: {}", layout.updates_dir().display()),
        format!("log: {}", layout.log_path().display()),
    ]
}
