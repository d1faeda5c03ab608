// Environment heuristic evaluators.
//
// Each evaluator runs a fixed battery of independent tests against the
// supplied environment attributes. A test whose required attribute is
// absent is excluded from both numerator and denominator - absence of a
// signal is never conflated with a negative result, and no evaluator ever
// fails on a missing capability. Evaluator score:
//
//   score = sum(weights of triggered tests) / tests actually run, capped at 1.0

use once_cell::sync::Lazy;
use tracing::trace;

use crate::classifier::SpecialVerdict;
use crate::config::{factor, HeuristicThresholds};
use crate::scoring::SuspicionFactor;
use crate::stats::coefficient_of_variation;
use crate::telemetry::{EnvironmentAttributes, InputLatencySample};

/// Remote-access products recognized by substring in attribute strings.
/// Lowercase needle -> display name surfaced in the special verdict.
static REMOTE_ACCESS_SIGNATURES: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("teamviewer", "TeamViewer"),
        ("anydesk", "AnyDesk"),
        ("vnc", "VNC"),
        ("citrix", "Citrix"),
        ("rdp", "RDP"),
        ("remote desktop", "Remote Desktop"),
        ("splashtop", "Splashtop"),
        ("logmein", "LogMeIn"),
    ]
});

/// Virtualization tells in renderer/vendor strings.
static VM_SIGNATURES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "vmware",
        "virtualbox",
        "vbox",
        "qemu",
        "parallels",
        "hyper-v",
        "virgl",
        "llvmpipe",
        "swiftshader",
    ]
});

/// Screen geometries typical of VM default displays.
static VM_SCREEN_GEOMETRIES: Lazy<Vec<(u32, u32)>> =
    Lazy::new(|| vec![(800, 600), (1024, 768), (1152, 864), (1280, 768)]);

/// Software rasterizer tells - headless environments render without a GPU.
const SOFTWARE_RENDERERS: &[&str] = &["swiftshader", "llvmpipe", "software", "mesa offscreen"];

/// Minimum latency pairs before the remote-latency test runs at all.
const MIN_LATENCY_SAMPLES: usize = 5;

/// One battery in progress: counts tests run, accumulates triggered
/// weight, and records why each triggered test fired.
#[derive(Debug, Default)]
struct Battery {
    tests_run: usize,
    triggered_weight: f64,
    reasons: Vec<String>,
}

impl Battery {
    /// Fold one test in. `signal` of None means the required attribute is
    /// absent: the test is excluded entirely.
    fn check(&mut self, reason: impl Into<String>, weight: f64, signal: Option<bool>) {
        match signal {
            None => {}
            Some(false) => self.tests_run += 1,
            Some(true) => {
                self.tests_run += 1;
                self.triggered_weight += weight;
                self.reasons.push(reason.into());
            }
        }
    }

    /// None when no test could run ("not applicable").
    fn into_factor(self, name: &'static str) -> Option<SuspicionFactor> {
        if self.tests_run == 0 {
            trace!(evaluator = name, "no applicable tests, factor excluded");
            return None;
        }
        let score = (self.triggered_weight / self.tests_run as f64).min(1.0);
        let mut f = SuspicionFactor::new(name, score);
        if !self.reasons.is_empty() {
            f.reason = Some(self.reasons.join("; "));
        }
        Some(f)
    }
}

/// Stateless evaluator battery over an attribute snapshot.
#[derive(Debug, Clone)]
pub struct EnvironmentEvaluator {
    thresholds: HeuristicThresholds,
}

/// What one evaluator produced for a cycle: at most one factor plus any
/// special verdict tags it observed.
#[derive(Debug, Clone, Default)]
pub struct EvaluatorOutput {
    pub factor: Option<SuspicionFactor>,
    pub verdicts: Vec<SpecialVerdict>,
}

impl EnvironmentEvaluator {
    pub fn new(thresholds: HeuristicThresholds) -> Self {
        Self { thresholds }
    }

    /// Headless-environment indicators.
    pub fn headless(&self, attrs: &EnvironmentAttributes) -> EvaluatorOutput {
        let identity = attrs.identity.as_deref().map(str::to_lowercase);
        let mut battery = Battery::default();

        battery.check(
            "automation flag is set",
            1.0,
            attrs.automation_flag,
        );
        battery.check(
            "identity string names a headless build",
            1.0,
            identity.as_deref().map(|s| s.contains("headless")),
        );
        // Plugin emptiness only means something for desktop identities.
        battery.check(
            "desktop identity reports zero plugins",
            0.4,
            match (&identity, attrs.plugin_count) {
                (Some(id), Some(count)) if is_desktop_identity(id) => Some(count == 0),
                _ => None,
            },
        );
        battery.check(
            "no languages reported",
            0.5,
            attrs.language_count.map(|n| n == 0),
        );
        battery.check(
            "outer window has zero extent",
            0.7,
            match (attrs.outer_width, attrs.outer_height) {
                (None, None) => None,
                (w, h) => Some(w == Some(0) || h == Some(0)),
            },
        );
        battery.check(
            "software rasterizer renderer",
            0.6,
            attrs.renderer.as_deref().map(|r| {
                let r = r.to_lowercase();
                SOFTWARE_RENDERERS.iter().any(|s| r.contains(s))
            }),
        );

        EvaluatorOutput {
            factor: battery.into_factor(factor::HEADLESS),
            verdicts: Vec::new(),
        }
    }

    /// Virtualized-environment indicators. A signature hit also emits the
    /// VirtualMachine tag.
    pub fn virtualization(&self, attrs: &EnvironmentAttributes) -> EvaluatorOutput {
        let mut battery = Battery::default();
        let mut verdicts = Vec::new();

        let backend = combined_renderer_string(attrs);
        let signature_hit = backend
            .as_deref()
            .map(|s| VM_SIGNATURES.iter().any(|sig| s.contains(sig)));
        if signature_hit == Some(true) {
            verdicts.push(SpecialVerdict::VirtualMachine);
        }
        battery.check(
            "rendering backend names a virtualization vendor",
            0.9,
            signature_hit,
        );
        battery.check(
            "VM-typical screen geometry",
            0.3,
            match (attrs.screen_width, attrs.screen_height) {
                (Some(w), Some(h)) => Some(VM_SCREEN_GEOMETRIES.contains(&(w, h))),
                _ => None,
            },
        );
        battery.check(
            "unusually low logical CPU count",
            0.3,
            attrs
                .hardware_concurrency
                .map(|n| n <= self.thresholds.low_concurrency_max),
        );
        battery.check(
            "fixed benchmark ran outside the native range",
            0.5,
            attrs
                .benchmark_elapsed_ms
                .filter(|ms| ms.is_finite())
                .map(|ms| ms > self.thresholds.benchmark_native_max_ms),
        );

        EvaluatorOutput {
            factor: battery.into_factor(factor::VIRTUALIZATION),
            verdicts,
        }
    }

    /// Remote-access indicators. Named-product hits emit both the
    /// NamedRemoteSoftware and RemoteDesktop tags; a strongly triggered
    /// battery emits RemoteDesktop on its own.
    pub fn remote_access(
        &self,
        attrs: &EnvironmentAttributes,
        latency: &[InputLatencySample],
    ) -> EvaluatorOutput {
        let mut battery = Battery::default();
        let mut verdicts = Vec::new();

        let haystack = combined_identity_string(attrs);
        let named = haystack.as_deref().map(|s| {
            REMOTE_ACCESS_SIGNATURES
                .iter()
                .find(|(needle, _)| s.contains(needle))
                .map(|(_, display)| *display)
        });
        if let Some(Some(display)) = named {
            verdicts.push(SpecialVerdict::NamedRemoteSoftware(display.to_string()));
            verdicts.push(SpecialVerdict::RemoteDesktop);
        }
        battery.check(
            "known remote-access product named in attributes",
            1.0,
            named.map(|hit| hit.is_some()),
        );
        battery.check(
            "remote-desktop-typical color depth",
            0.7,
            attrs
                .color_depth
                .map(|d| d <= self.thresholds.remote_color_depth_max),
        );
        battery.check(
            "input latency elevated and uniform",
            0.8,
            self.latency_signal(latency),
        );
        battery.check(
            "outer window exceeds reported screen",
            0.4,
            match (attrs.outer_width, attrs.screen_width) {
                (Some(outer), Some(screen)) => Some(outer > screen),
                _ => None,
            },
        );

        let factor = battery.into_factor(factor::REMOTE_ACCESS);
        if factor.as_ref().is_some_and(|f| f.score >= 0.5)
            && !verdicts.contains(&SpecialVerdict::RemoteDesktop)
        {
            verdicts.push(SpecialVerdict::RemoteDesktop);
        }

        EvaluatorOutput { factor, verdicts }
    }

    /// Cross-checks between the claimed identity and the observed
    /// capabilities.
    pub fn identity_consistency(&self, attrs: &EnvironmentAttributes) -> EvaluatorOutput {
        let identity = attrs.identity.as_deref().map(str::to_lowercase);
        let platform = attrs.platform.as_deref().map(str::to_lowercase);
        let mut battery = Battery::default();

        battery.check(
            "mobile identity without touch support",
            0.8,
            match (&identity, attrs.max_touch_points) {
                (Some(id), Some(touch)) if is_mobile_identity(id) => Some(touch == 0),
                _ => None,
            },
        );
        battery.check(
            "identity and platform disagree on operating system",
            0.8,
            match (&identity, &platform) {
                (Some(id), Some(p)) => Some(os_mismatch(id, p)),
                _ => None,
            },
        );
        battery.check(
            "claimed browser lacks its vendor runtime marker",
            0.5,
            match (&identity, attrs.vendor_marker_present) {
                (Some(id), Some(marker)) if id.contains("chrome") && !id.contains("headless") => {
                    Some(!marker)
                }
                _ => None,
            },
        );
        battery.check(
            "platform-exclusive browser on a foreign platform",
            0.6,
            match (&identity, &platform) {
                (Some(id), Some(p)) if is_safari_identity(id) => {
                    Some(p.contains("win") || p.contains("linux"))
                }
                _ => None,
            },
        );

        EvaluatorOutput {
            factor: battery.into_factor(factor::IDENTITY_CONSISTENCY),
            verdicts: Vec::new(),
        }
    }

    /// Elevated AND uniform press/release latency: the buffering a remote
    /// link introduces raises the mean and flattens the variance together.
    /// None until enough pairs exist.
    fn latency_signal(&self, latency: &[InputLatencySample]) -> Option<bool> {
        let holds: Vec<f64> = latency
            .iter()
            .filter_map(|s| s.hold_ms())
            .map(|ms| ms as f64)
            .collect();
        if holds.len() < MIN_LATENCY_SAMPLES {
            return None;
        }
        let mean = holds.iter().sum::<f64>() / holds.len() as f64;
        let cv = coefficient_of_variation(holds.iter().copied())?;
        Some(mean >= self.thresholds.remote_latency_min_ms && cv <= self.thresholds.remote_latency_cv_max)
    }
}

fn combined_renderer_string(attrs: &EnvironmentAttributes) -> Option<String> {
    match (&attrs.renderer_vendor, &attrs.renderer) {
        (None, None) => None,
        (v, r) => Some(
            format!("{} {}", v.as_deref().unwrap_or(""), r.as_deref().unwrap_or("")).to_lowercase(),
        ),
    }
}

fn combined_identity_string(attrs: &EnvironmentAttributes) -> Option<String> {
    let parts: Vec<&str> = [&attrs.identity, &attrs.renderer_vendor, &attrs.renderer]
        .iter()
        .filter_map(|o| o.as_deref())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" ").to_lowercase())
    }
}

fn is_desktop_identity(identity: &str) -> bool {
    !identity.contains("mobile") && !identity.contains("android") && !identity.contains("iphone")
}

fn is_mobile_identity(identity: &str) -> bool {
    identity.contains("android") || identity.contains("iphone") || identity.contains("mobile")
}

fn is_safari_identity(identity: &str) -> bool {
    identity.contains("safari") && !identity.contains("chrome") && !identity.contains("chromium")
}

fn os_mismatch(identity: &str, platform: &str) -> bool {
    let claims_windows = identity.contains("windows");
    let claims_mac = identity.contains("mac os") || identity.contains("macintosh");
    let claims_linux = identity.contains("linux") && !identity.contains("android");

    (claims_windows && (platform.contains("mac") || platform.contains("linux")))
        || (claims_mac && (platform.contains("win") || platform.contains("linux")))
        || (claims_linux && (platform.contains("win") || platform.contains("mac")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::telemetry::InputModality;

    fn evaluator() -> EnvironmentEvaluator {
        EnvironmentEvaluator::new(DetectionConfig::default().heuristics)
    }

    const DESKTOP_CHROME: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0.0.0 Safari/537.36";

    #[test]
    fn test_empty_attributes_yield_no_factor() {
        let attrs = EnvironmentAttributes::default();
        let out = evaluator().headless(&attrs);
        assert!(out.factor.is_none(), "no attributes means not applicable, not zero");
        assert!(evaluator().virtualization(&attrs).factor.is_none());
        assert!(evaluator().identity_consistency(&attrs).factor.is_none());
        assert!(evaluator().remote_access(&attrs, &[]).factor.is_none());
    }

    #[test]
    fn test_headless_tells_stack_up() {
        let attrs = EnvironmentAttributes {
            identity: Some("Mozilla/5.0 HeadlessChrome/120.0.0.0".to_string()),
            automation_flag: Some(true),
            plugin_count: Some(0),
            language_count: Some(0),
            outer_width: Some(0),
            outer_height: Some(0),
            renderer: Some("Google SwiftShader".to_string()),
            ..Default::default()
        };
        let out = evaluator().headless(&attrs);
        let f = out.factor.unwrap();
        assert!(f.score > 0.6, "headless battery scored {}", f.score);
        assert!(f.reason.unwrap().contains("automation flag"));
    }

    #[test]
    fn test_headless_clean_browser_scores_zero() {
        let attrs = EnvironmentAttributes {
            identity: Some(DESKTOP_CHROME.to_string()),
            automation_flag: Some(false),
            plugin_count: Some(5),
            language_count: Some(2),
            outer_width: Some(1920),
            outer_height: Some(1040),
            renderer: Some("ANGLE (NVIDIA GeForce RTX 3060)".to_string()),
            ..Default::default()
        };
        let f = evaluator().headless(&attrs).factor.unwrap();
        assert_eq!(f.score, 0.0);
        assert!(f.reason.is_none());
    }

    #[test]
    fn test_missing_capability_excluded_from_denominator() {
        // One test runs and triggers: score must be 1.0, not diluted by
        // the five tests whose attributes are absent.
        let attrs = EnvironmentAttributes {
            automation_flag: Some(true),
            ..Default::default()
        };
        let f = evaluator().headless(&attrs).factor.unwrap();
        assert_eq!(f.score, 1.0);
    }

    #[test]
    fn test_virtualization_signature_emits_tag() {
        let attrs = EnvironmentAttributes {
            renderer_vendor: Some("VMware, Inc.".to_string()),
            renderer: Some("SVGA3D; build: RELEASE".to_string()),
            screen_width: Some(1024),
            screen_height: Some(768),
            hardware_concurrency: Some(2),
            ..Default::default()
        };
        let out = evaluator().virtualization(&attrs);
        assert!(out.verdicts.contains(&SpecialVerdict::VirtualMachine));
        assert!(out.factor.unwrap().score > 0.4);
    }

    #[test]
    fn test_virtualization_native_gpu_is_clean() {
        let attrs = EnvironmentAttributes {
            renderer_vendor: Some("NVIDIA Corporation".to_string()),
            renderer: Some("NVIDIA GeForce RTX 3060/PCIe/SSE2".to_string()),
            screen_width: Some(2560),
            screen_height: Some(1440),
            hardware_concurrency: Some(16),
            benchmark_elapsed_ms: Some(12.0),
            ..Default::default()
        };
        let out = evaluator().virtualization(&attrs);
        assert_eq!(out.factor.unwrap().score, 0.0);
        assert!(out.verdicts.is_empty());
    }

    #[test]
    fn test_named_remote_software_detected() {
        let attrs = EnvironmentAttributes {
            identity: Some(DESKTOP_CHROME.to_string()),
            renderer: Some("AnyDesk mirror driver".to_string()),
            color_depth: Some(16),
            ..Default::default()
        };
        let out = evaluator().remote_access(&attrs, &[]);
        assert!(out
            .verdicts
            .contains(&SpecialVerdict::NamedRemoteSoftware("AnyDesk".to_string())));
        assert!(out.verdicts.contains(&SpecialVerdict::RemoteDesktop));
        assert!(out.factor.unwrap().score > 0.5);
    }

    #[test]
    fn test_remote_latency_signal() {
        // Uniform 150 ms holds: elevated mean, near-zero CoV.
        let latency: Vec<_> = (0..10)
            .map(|i| InputLatencySample {
                modality: InputModality::Keyboard,
                press_ms: i * 500,
                release_ms: i * 500 + 150,
            })
            .collect();
        let attrs = EnvironmentAttributes {
            color_depth: Some(24),
            ..Default::default()
        };
        let out = evaluator().remote_access(&attrs, &latency);
        let f = out.factor.unwrap();
        // Two tests ran (color depth passed, latency triggered): 0.8 / 2
        assert!((f.score - 0.4).abs() < 1e-12, "scored {}", f.score);
    }

    #[test]
    fn test_too_few_latency_pairs_is_not_applicable() {
        let latency: Vec<_> = (0..3)
            .map(|i| InputLatencySample {
                modality: InputModality::Keyboard,
                press_ms: i * 500,
                release_ms: i * 500 + 150,
            })
            .collect();
        let attrs = EnvironmentAttributes::default();
        // Latency is the only candidate test and it cannot run.
        assert!(evaluator().remote_access(&attrs, &latency).factor.is_none());
    }

    #[test]
    fn test_identity_mismatch_checks() {
        let attrs = EnvironmentAttributes {
            identity: Some("Mozilla/5.0 (Windows NT 10.0) Chrome/120.0".to_string()),
            platform: Some("MacIntel".to_string()),
            vendor_marker_present: Some(false),
            max_touch_points: Some(0),
            ..Default::default()
        };
        let f = evaluator().identity_consistency(&attrs).factor.unwrap();
        // OS mismatch (0.8) + missing marker (0.5) over 2 tests run
        assert!((f.score - 0.65).abs() < 1e-12, "scored {}", f.score);
        assert!(f.reason.unwrap().contains("disagree"));
    }

    #[test]
    fn test_consistent_identity_scores_zero() {
        let attrs = EnvironmentAttributes {
            identity: Some(DESKTOP_CHROME.to_string()),
            platform: Some("Win32".to_string()),
            vendor_marker_present: Some(true),
            max_touch_points: Some(0),
            ..Default::default()
        };
        let f = evaluator().identity_consistency(&attrs).factor.unwrap();
        assert_eq!(f.score, 0.0);
    }
}
