use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum UiMode {
    Plain,
    Interactive,
}

#[derive(Copy, Clone, Debug)]
struct TerminalRenderer {
    style: OutputStyle,
    mode: UiMode,
}

struct TerminalProgress {
    style: OutputStyle,
    label: String,
    total: u64,
    current: u64,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl TerminalRenderer {
    fn from_style(style: OutputStyle) -> Self {
        Self {
            style,
            mode: ui_mode_from_style(style),
        }
    }

    fn style(self) -> OutputStyle {
        self.style
    }

    fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    fn print_section(self, title: &str) {
        if let Some(line) = render_section_header(self.mode, title) {
            println!();
            let rendered = match self.style {
                OutputStyle::Plain => line,
                OutputStyle::Rich => colorize(section_style(), &line),
            };
            println!("{rendered}");
        }
    }

    /// `total` of zero means the size is unknown.
    fn start_progress(self, label: &str, total: u64) -> TerminalProgress {
        let progress_bar = if self.style == OutputStyle::Rich {
            let (progress_bar, template) = if total == 0 {
                (
                    ProgressBar::new_spinner(),
                    "{spinner:.cyan.bold} {msg:<10} {bytes:>10} {elapsed_precise}",
                )
            } else {
                (
                    ProgressBar::new(total),
                    "{spinner:.cyan.bold} {msg:<10} [{bar:24.cyan/blue}] {bytes:>10}/{total_bytes:10} {elapsed_precise}",
                )
            };
            if let Ok(style) = ProgressStyle::with_template(template) {
                progress_bar.set_style(
                    style
                        .tick_chars(progress_tick_chars(label))
                        .progress_chars("=>-"),
                );
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        TerminalProgress {
            style: self.style,
            label: label.to_string(),
            total,
            current: 0,
            progress_bar,
            started_at: Instant::now(),
        }
    }

    fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }
}

impl TerminalProgress {
    fn set(&mut self, current: u64) {
        self.current = if self.total == 0 {
            current
        } else {
            current.min(self.total)
        };

        let Some(progress_bar) = &self.progress_bar else {
            return;
        };
        progress_bar.set_position(self.current);
    }

    fn finish_success(mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };

        progress_bar.finish_and_clear();
        if let Some(line) = render_progress_line(
            self.style,
            &self.label,
            self.current,
            self.total,
            Some(self.started_at.elapsed()),
        ) {
            println!("{line}");
        }
    }

    fn finish_abandon(mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

/// Turns the updater's event stream into status lines and progress bars.
struct StageView {
    renderer: TerminalRenderer,
    stage: Option<ProgressStage>,
    progress: Option<TerminalProgress>,
}

impl StageView {
    fn new(renderer: TerminalRenderer) -> Self {
        Self {
            renderer,
            stage: None,
            progress: None,
        }
    }

    fn handle(&mut self, event: UpdateEvent) {
        match event {
            UpdateEvent::StateChanged(state) => {
                if let Some(step) = stage_step_label(state) {
                    self.close(true);
                    self.renderer.print_section(step);
                    if self.renderer.style() == OutputStyle::Plain {
                        println!("{step}");
                    }
                }
            }
            UpdateEvent::Progress { stage, event } => self.progress(stage, event),
            UpdateEvent::Message(message) => {
                self.close(true);
                self.renderer.print_status("info", &message);
            }
        }
    }

    fn progress(&mut self, stage: ProgressStage, event: ProgressEvent) {
        if self.stage != Some(stage) {
            self.close(true);
            self.stage = Some(stage);
            self.progress = Some(
                self.renderer
                    .start_progress(stage.as_str(), event.bytes_total.unwrap_or(0)),
            );
        }
        if let Some(progress) = &mut self.progress {
            progress.set(event.bytes_done);
        }
    }

    fn close(&mut self, success: bool) {
        if let Some(progress) = self.progress.take() {
            if success {
                progress.finish_success();
            } else {
                progress.finish_abandon();
            }
        }
    }

    fn finish(mut self, success: bool) {
        self.close(success);
    }
}

fn stage_step_label(state: airdocs_updater::UpdateState) -> Option<&'static str> {
    use airdocs_updater::UpdateState;
    match state {
        UpdateState::Downloading => Some("downloading"),
        UpdateState::Verifying => Some("verifying"),
        UpdateState::Extracting => Some("extracting"),
        _ => None,
    }
}

fn resolve_output_style(stdout_is_tty: bool, _stderr_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

fn resolve_output_style_for(plain: bool) -> OutputStyle {
    if plain || std::env::var_os("NO_COLOR").is_some() {
        return OutputStyle::Plain;
    }
    resolve_output_style(io::stdout().is_terminal(), io::stderr().is_terminal())
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn progress_tick_chars(label: &str) -> &'static str {
    match label {
        "download" => "<^>v ",
        "extract" => ".oO@* ",
        _ => "|/-\\ ",
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn progress_bar_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightBlue.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn ui_mode_from_style(style: OutputStyle) -> UiMode {
    match style {
        OutputStyle::Plain => UiMode::Plain,
        OutputStyle::Rich => UiMode::Interactive,
    }
}

fn render_section_header(mode: UiMode, title: &str) -> Option<String> {
    match mode {
        UiMode::Plain => None,
        UiMode::Interactive => Some(format!("== {title} ==")),
    }
}

fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("[{}] {message}", status.to_ascii_uppercase()),
    }
}

fn render_progress_line(
    style: OutputStyle,
    label: &str,
    current: u64,
    total: u64,
    elapsed: Option<Duration>,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }

    let width = 18_usize;
    let safe_total = total.max(current).max(1);
    let bounded_current = current.min(safe_total);
    let filled = ((bounded_current as u128 * width as u128) / safe_total as u128) as usize;
    let bar = format!(
        "{}{}",
        "=".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    );
    let percent = (bounded_current as u128 * 100) / safe_total as u128;
    let counts = if total == 0 {
        HumanBytes(current).to_string()
    } else {
        format!("{}/{}", HumanBytes(current), HumanBytes(total))
    };
    let suffix = elapsed
        .map(|value| format!(" complete in {}", format_elapsed(value)))
        .unwrap_or_default();

    Some(format!(
        "{} [{}] {:>3}% {}{}",
        colorize(progress_label_style(), label),
        colorize(progress_bar_style(), &bar),
        percent,
        counts,
        suffix
    ))
}

fn format_release_lines(release: &ReleaseInfo, current: &str, style: OutputStyle) -> Vec<String> {
    let mut lines = vec![render_status_line(
        style,
        "new",
        &format!(
            "AirDocs {} is available (running {current}, {} channel)",
            release.version, release.channel
        ),
    )];
    if !release.release_date.is_empty() {
        lines.push(format!("released: {}", release.release_date));
    }
    if release.size_bytes > 0 {
        lines.push(format!("size: {}", HumanBytes(release.size_bytes)));
    }
    lines.push(format!(
        "sha256: {}",
        release.sha256.as_deref().unwrap_or("not published (unverified)")
    ));
    let notes = release.release_notes.trim();
    if !notes.is_empty() {
        lines.push("notes:".to_string());
        lines.extend(notes.lines().map(|line| format!("  {line}")));
    }
    lines
}

fn format_startup_report(report: &StartupReport, style: OutputStyle) -> Vec<String> {
    match report {
        StartupReport::NothingPending => vec!["No staged update".to_string()],
        StartupReport::Applied { version } => vec![render_status_line(
            style,
            "ok",
            &format!("AirDocs updated to {version}"),
        )],
        StartupReport::RolledBack { version, error } => vec![
            render_status_line(
                style,
                "warn",
                &format!("update to {version} failed; previous version restored"),
            ),
            format!("reason: {error}"),
        ],
        StartupReport::Deferred { version, error } => vec![
            render_status_line(
                style,
                "warn",
                &format!("update to {version} postponed; it will be retried on next start"),
            ),
            format!("reason: {error}"),
        ],
        StartupReport::Discarded { version, error } => vec![
            render_status_line(
                style,
                "warn",
                &format!("staged update {version} was incomplete and has been dropped"),
            ),
            format!("reason: {error}"),
        ],
        StartupReport::Recovered { rolled_back } => {
            let message = if *rolled_back {
                "an interrupted update was rolled back"
            } else {
                "an interrupted update was completed"
            };
            vec![render_status_line(style, "ok", message)]
        }
        StartupReport::FatalRollback {
            app_dir,
            app_dir_old,
            message,
        } => vec![
            render_status_line(
                style,
                "error",
                "the previous AirDocs installation could not be restored",
            ),
            format!("previous installation: {}", app_dir_old.display()),
            format!("expected location: {}", app_dir.display()),
            "move the previous installation back to the expected location, then start AirDocs again"
                .to_string(),
            format!("details: {message}"),
        ],
    }
}

fn format_history_lines(records: &[UpdateHistoryRecord], style: OutputStyle) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let (status, outcome) = match (record.install_success, record.rollback_occurred) {
                (true, _) => ("ok", "installed"),
                (false, true) => ("warn", "rolled back"),
                (false, false) => ("error", "failed"),
            };
            let mut message = format!(
                "{} {} -> {} {outcome} ({}, {})",
                record.installed_at.format("%Y-%m-%d %H:%M:%S"),
                record.previous_version,
                record.version,
                record.channel,
                record.install_method.as_str()
            );
            if let Some(error) = &record.error_message {
                message.push_str(&format!(": {error}"));
            }
            render_status_line(style, status, &message)
        })
        .collect()
}

fn format_source(config: &UpdaterConfig) -> String {
    match &config.source {
        Some(airdocs_updater::SourceConfig::Manifest { url }) => format!("manifest {url}"),
        Some(airdocs_updater::SourceConfig::Github { repo, api_base }) => match api_base {
            Some(api_base) => format!("github {repo} via {api_base}"),
            None => format!("github {repo}"),
        },
        None => "not configured".to_string(),
    }
}

fn format_status_lines(
    layout: &UpdateLayout,
    config: &UpdaterConfig,
    current_version: &str,
    pending: Option<&PendingUpdate>,
) -> Vec<String> {
    let mut lines = vec![
        format!("version: {current_version}"),
        format!("channel: {}", config.channel),
        format!("source: {}", format_source(config)),
        format!("app dir: {}", layout.app_dir().display()),
        format!("user dir: {}", layout.user_dir().display()),
    ];
    match pending {
        Some(pending) => {
            lines.push(format!(
                "staged: {} (downloaded {})",
                pending.version,
                pending.download_timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            ));
            lines.push(format!("staged files: {}", pending.extracted_path.display()));
            lines.push(format!(
                "sha256: {}",
                pending.sha256.as_deref().unwrap_or("not published (unverified)")
            ));
        }
        None => lines.push("staged: none".to_string()),
    }
    lines
}
