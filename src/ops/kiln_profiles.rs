//! Implementation of `kiln profiles`.

use anyhow::Result;

use crate::core::{Manifest, OptionValue, ResolvedProfile};

/// One profile as a build type resolves it.
#[derive(Debug)]
pub struct ProfileSummary {
    pub name: String,
    pub parent: Option<String>,
    pub resolved: ResolvedProfile,
}

/// Build types and the profiles they resolve to.
#[derive(Debug)]
pub struct ProfileReport {
    pub build_types: Vec<String>,
    /// Build type the profiles were resolved for, if any
    pub build_type: Option<String>,
    pub profiles: Vec<ProfileSummary>,
}

/// Resolve every profile, optionally with a build type applied.
pub fn profiles(manifest: &Manifest, build_type: Option<&str>) -> Result<ProfileReport> {
    let set = match build_type {
        Some(name) => manifest.configure(name)?,
        None => manifest.profile_set()?,
    };

    let mut profiles = Vec::new();
    for name in set.names() {
        profiles.push(ProfileSummary {
            name: name.to_string(),
            parent: set.get(name).and_then(|p| p.parent()).map(str::to_string),
            resolved: set.resolve(name)?,
        });
    }

    Ok(ProfileReport {
        build_types: manifest
            .build_type_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
        build_type: build_type.map(str::to_string),
        profiles,
    })
}

/// Render a report for the terminal.
pub fn format_report(report: &ProfileReport) -> String {
    let mut out = String::new();
    out.push_str("Build types:\n");
    for name in &report.build_types {
        out.push_str(&format!("  {}\n", name));
    }

    match &report.build_type {
        Some(bt) => out.push_str(&format!("\nProfiles ({}):\n", bt)),
        None => out.push_str("\nProfiles:\n"),
    }
    for profile in &report.profiles {
        match &profile.parent {
            Some(parent) => out.push_str(&format!("  {} (parent: {})\n", profile.name, parent)),
            None => out.push_str(&format!("  {}\n", profile.name)),
        }
        for (key, value) in profile.resolved.options() {
            let shown = match value {
                OptionValue::Scalar(s) => s.clone(),
                OptionValue::List(items) => format!("[{}]", items.join(", ")),
            };
            out.push_str(&format!("    {} = {}\n", key, shown));
        }
    }
    out
}
