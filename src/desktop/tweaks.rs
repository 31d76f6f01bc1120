//! Font, GNOME settings and dock favorites. Every step is best-effort.

use anyhow::{Context, Result};

use super::favorites::quote;
use super::{DesktopContext, GSettings};
use crate::common::{StepOutcome, StepReport};
use crate::config::{DesktopConfig, FontConfig};
use crate::package::{AptBackend, PackageSpec};
use crate::ui::prelude::*;

/// Apply the desktop section of the config, plus any extra ids to pin.
pub fn apply(
    config: &DesktopConfig,
    ctx: &DesktopContext,
    apt: &AptBackend,
    extra_favorites: &[String],
) -> Vec<StepReport> {
    let executor = apt.executor();
    let gsettings = GSettings::new(ctx, executor);
    let mut reports = Vec::new();

    emit(
        Level::Info,
        "desktop.apply",
        &format!(
            "{} Configuring the desktop for {}",
            char::from(NerdFont::Desktop),
            ctx.user()
        ),
        None,
    );
    emit(
        Level::Debug,
        "desktop.session",
        &format!(
            "Session bus {} with HOME={}",
            ctx.bus_address(),
            ctx.home().display()
        ),
        None,
    );

    if let Some(font) = &config.font {
        reports.extend(apply_font(font, ctx, apt, &gsettings));
    }

    if !config.settings.is_empty() {
        reports.push(StepReport::new(
            "desktop.settings",
            apply_settings(config, &gsettings),
        ));
    }

    let favorites: Vec<&String> = config.favorites.iter().chain(extra_favorites).collect();
    if !favorites.is_empty() {
        let result = gsettings.pin(&favorites);
        reports.push(StepReport::new(
            "desktop.favorites",
            StepOutcome::best_effort(result),
        ));
    }

    reports
}

/// The font-name is set even when the font package could not be installed.
fn apply_font(
    font: &FontConfig,
    ctx: &DesktopContext,
    apt: &AptBackend,
    gsettings: &GSettings,
) -> Vec<StepReport> {
    let mut reports = Vec::new();
    if let Err(e) = ensure_font(font, ctx, apt) {
        emit(
            Level::Warn,
            "desktop.font.missing",
            &format!(
                "{} {e:#}, setting the font anyway",
                char::from(NerdFont::Warning)
            ),
            None,
        );
        reports.push(StepReport::new(
            "desktop.font.package",
            StepOutcome::Ignored(format!("{e:#}")),
        ));
    }

    let result = gsettings.set(
        "org.gnome.desktop.interface",
        "font-name",
        &quote(&font.setting()),
    );
    reports.push(StepReport::new("desktop.font", StepOutcome::best_effort(result)));
    reports
}

fn apply_settings(config: &DesktopConfig, gsettings: &GSettings) -> StepOutcome {
    let failures: Vec<String> = config
        .settings
        .iter()
        .filter_map(|s| {
            gsettings
                .set(&s.schema, &s.key, &s.value)
                .err()
                .map(|e| format!("{e:#}"))
        })
        .collect();

    match failures.first() {
        None => StepOutcome::Success,
        Some(first) => StepOutcome::Ignored(format!(
            "{} of {} settings failed, first: {}",
            failures.len(),
            config.settings.len(),
            first
        )),
    }
}

fn font_available(family: &str, ctx: &DesktopContext) -> bool {
    let argv = ctx.argv("fc-list", &[":family"]);
    duct::cmd(&argv[0], &argv[1..])
        .stderr_null()
        .read()
        .map(|families| families_contain(&families, family))
        .unwrap_or(false)
}

fn families_contain(fc_list_output: &str, family: &str) -> bool {
    let wanted = family.to_lowercase();
    fc_list_output
        .lines()
        .flat_map(|line| line.split(','))
        .any(|name| name.trim().to_lowercase() == wanted)
}

/// Install the font package when fontconfig does not know the family.
fn ensure_font(font: &FontConfig, ctx: &DesktopContext, apt: &AptBackend) -> Result<()> {
    if font_available(&font.family, ctx) {
        emit(
            Level::Debug,
            "desktop.font.present",
            &format!("Font {} already available", font.family),
            None,
        );
        return Ok(());
    }

    emit(
        Level::Info,
        "desktop.font.install",
        &format!(
            "{} Installing {} for font {}",
            char::from(NerdFont::Download),
            font.package,
            font.family
        ),
        None,
    );
    apt.install_many(&[PackageSpec::new(font.package.as_str())])
        .with_context(|| format!("installing font package {}", font.package))?;

    if apt.executor().dry_run || font_available(&font.family, ctx) {
        return Ok(());
    }
    anyhow::bail!(
        "font {} still unavailable after installing {}",
        font.family,
        font.package
    )
}
