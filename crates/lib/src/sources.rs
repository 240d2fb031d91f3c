//! Source set assembly.
//!
//! A target's compilation units are its base sources followed by every
//! optional module whose guard holds, in declaration order. Guards are
//! evaluated independently; the order of the result never depends on the
//! order in which flags were set, so link order and static-initialization
//! order stay reproducible.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::platform::os::Os;

/// Feature flags of one configuration pass. Opaque inputs to the guards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
  pub enabled: BTreeSet<String>,
  pub platform: Os,
}

impl FeatureFlags {
  pub fn new(platform: Os) -> Self {
    Self {
      enabled: BTreeSet::new(),
      platform,
    }
  }

  pub fn with(mut self, feature: &str) -> Self {
    self.enabled.insert(feature.to_string());
    self
  }

  pub fn is_enabled(&self, feature: &str) -> bool {
    self.enabled.contains(feature)
  }
}

/// A compilation unit gated on a feature flag and a set of compatible platforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptionalModule {
  pub source: PathBuf,
  pub feature: String,
  /// Platforms the module compiles on; empty means every platform.
  #[serde(default)]
  pub platforms: Vec<Os>,
  /// Extra link handles required only when the module is enabled.
  #[serde(default)]
  pub links: Vec<String>,
}

impl OptionalModule {
  pub fn new(source: impl Into<PathBuf>, feature: &str) -> Self {
    Self {
      source: source.into(),
      feature: feature.to_string(),
      platforms: Vec::new(),
      links: Vec::new(),
    }
  }

  pub fn on_platforms(mut self, platforms: &[Os]) -> Self {
    self.platforms = platforms.to_vec();
    self
  }

  pub fn with_links(mut self, links: &[&str]) -> Self {
    self.links = links.iter().map(|s| s.to_string()).collect();
    self
  }

  /// Platform compatibility AND feature flag.
  pub fn is_enabled(&self, flags: &FeatureFlags) -> bool {
    let platform_ok = self.platforms.is_empty() || self.platforms.contains(&flags.platform);
    platform_ok && flags.is_enabled(&self.feature)
  }
}

/// Result of assembling one target's sources.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceSet {
  pub sources: Vec<PathBuf>,
  /// Link handles contributed by enabled optional modules, in declaration order.
  pub extra_links: Vec<String>,
}

/// Base sources followed by each enabled optional module, in declaration order.
///
/// A source listed more than once is kept at its first position.
pub fn assemble(base: &[PathBuf], optional: &[OptionalModule], flags: &FeatureFlags) -> SourceSet {
  let mut set = SourceSet::default();
  let mut seen = BTreeSet::new();

  let enabled = optional.iter().filter(|module| module.is_enabled(flags));
  let candidates = base.iter().chain(enabled.clone().map(|module| &module.source));

  for source in candidates {
    if seen.insert(source.clone()) {
      set.sources.push(source.clone());
    }
  }

  for link in enabled.flat_map(|module| module.links.iter()) {
    if !set.extra_links.contains(link) {
      set.extra_links.push(link.clone());
    }
  }

  set
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn base() -> Vec<PathBuf> {
    vec![PathBuf::from("bench/main.cc"), PathBuf::from("bench/hash.cc")]
  }

  fn tls_module() -> OptionalModule {
    OptionalModule::new("bench/tls.cc", "tls")
      .on_platforms(&[Os::Linux, Os::MacOs])
      .with_links(&["ssl"])
  }

  #[test]
  fn tls_disabled_returns_base_on_every_platform() {
    for os in [Os::Linux, Os::MacOs, Os::Windows, Os::FreeBsd] {
      let set = assemble(&base(), &[tls_module()], &FeatureFlags::new(os));
      assert_eq!(set.sources, base());
      assert!(set.extra_links.is_empty());
    }
  }

  #[test]
  fn tls_enabled_on_capable_platform_appends_module_last() {
    let set = assemble(&base(), &[tls_module()], &FeatureFlags::new(Os::Linux).with("tls"));

    assert_eq!(
      set.sources,
      vec![
        PathBuf::from("bench/main.cc"),
        PathBuf::from("bench/hash.cc"),
        PathBuf::from("bench/tls.cc"),
      ]
    );
    assert_eq!(set.extra_links, vec!["ssl".to_string()]);
  }

  #[test]
  fn tls_enabled_on_incapable_platform_is_skipped() {
    let set = assemble(&base(), &[tls_module()], &FeatureFlags::new(Os::Windows).with("tls"));
    assert_eq!(set.sources, base());
  }

  #[test]
  fn module_without_platform_list_applies_everywhere() {
    let module = OptionalModule::new("bench/stream.cc", "stream");
    let set = assemble(&base(), &[module], &FeatureFlags::new(Os::Windows).with("stream"));
    assert_eq!(set.sources.last(), Some(&PathBuf::from("bench/stream.cc")));
  }

  #[test]
  fn duplicate_source_kept_at_first_position() {
    let module = OptionalModule::new("bench/main.cc", "tls");
    let set = assemble(&base(), &[module], &FeatureFlags::new(Os::Linux).with("tls"));
    assert_eq!(set.sources, base());
  }

  fn declared_modules() -> impl Strategy<Value = (Vec<usize>, Vec<bool>)> {
    (1..8usize).prop_flat_map(|n| {
      (
        Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
        prop::collection::vec(any::<bool>(), n),
      )
    })
  }

  proptest! {
    /// Enabled modules appear in the order they are declared, whatever that order is.
    #[test]
    fn order_is_declaration_order((declared, mask) in declared_modules()) {
      let modules: Vec<OptionalModule> = declared
        .iter()
        .map(|i| OptionalModule::new(format!("opt{i}.cc"), &format!("f{i}")))
        .collect();

      let mut flags = FeatureFlags::new(Os::Linux);
      for i in (0..mask.len()).filter(|i| mask[*i]) {
        flags = flags.with(&format!("f{i}"));
      }

      let set = assemble(&base(), &modules, &flags);

      let expected: Vec<PathBuf> = base()
        .into_iter()
        .chain(declared.iter().filter(|i| mask[**i]).map(|i| PathBuf::from(format!("opt{i}.cc"))))
        .collect();
      prop_assert_eq!(set.sources, expected);
    }
  }
}
