use std::collections::BTreeMap;

use crate::settings::LocaleSettings;

/// Maps local locale codes to TMS locale codes and back.
#[derive(Debug, Clone, Default)]
pub struct LocaleMapper {
    source: String,
    enabled: Vec<String>,
    to_tms: BTreeMap<String, String>,
}

impl LocaleMapper {
    pub fn new(source: &str, enabled: Vec<String>, to_tms: BTreeMap<String, String>) -> Self {
        Self {
            source: normalize(source),
            enabled: enabled.iter().map(|locale| normalize(locale)).collect(),
            to_tms: to_tms
                .into_iter()
                .map(|(local, remote)| (normalize(&local), normalize(&remote)))
                .collect(),
        }
    }

    pub fn from_settings(settings: &LocaleSettings) -> Self {
        Self::new(&settings.source, settings.enabled.clone(), settings.tms.clone())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Enabled target locales, without the site source locale.
    pub fn targets(&self) -> Vec<String> {
        self.enabled
            .iter()
            .filter(|locale| **locale != self.source)
            .cloned()
            .collect()
    }

    pub fn is_enabled(&self, locale: &str) -> bool {
        let locale = normalize(locale);
        self.enabled.contains(&locale)
    }

    pub fn to_tms(&self, locale: &str) -> String {
        let locale = normalize(locale);
        self.to_tms.get(&locale).cloned().unwrap_or(locale)
    }

    /// Resolves a locale reported by the TMS to an enabled local locale.
    ///
    /// Codes compare case-insensitively. A bare language match is used only
    /// when it is unambiguous and does not swap one region for another.
    pub fn to_local(&self, tms_locale: &str) -> Option<String> {
        let code = normalize(tms_locale);
        if let Some((local, _)) = self.to_tms.iter().find(|(local, remote)| {
            remote.eq_ignore_ascii_case(&code) && self.enabled.contains(local)
        }) {
            return Some(local.clone());
        }
        if let Some(local) = self
            .enabled
            .iter()
            .find(|local| local.eq_ignore_ascii_case(&code))
        {
            return Some(local.clone());
        }
        let (language, region) = split(&code);
        let mut candidates = self.enabled.iter().filter(|local| {
            let (local_language, local_region) = split(local);
            local_language.eq_ignore_ascii_case(language)
                && (region.is_none() || local_region.is_none())
        });
        match (candidates.next(), candidates.next()) {
            (Some(local), None) => Some(local.clone()),
            _ => None,
        }
    }
}

/// `de_DE` and `de-DE` are the same locale.
pub fn normalize(locale: &str) -> String {
    locale.trim().replace('_', "-")
}

fn split(locale: &str) -> (&str, Option<&str>) {
    match locale.split_once('-') {
        Some((language, region)) => (language, Some(region)),
        None => (locale, None),
    }
}
