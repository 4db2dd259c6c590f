//! Physical device capability detection and suitability scoring.

use crate::context::QueueFamilyIndices;
use crate::surface::SurfaceContext;
use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// Score every device with the geometry-shader feature starts from.
pub const BASE_SCORE: u64 = 1;

/// Bonus for each satisfied checklist item (discrete GPU, queue families, extensions).
pub const CHECKLIST_BONUS: u64 = 1000;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Everything device selection needs to know about one physical device.
///
/// Built once per candidate by [`DeviceProfile::query`]; scoring is a pure
/// function of these fields.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    /// Device name
    pub device_name: String,
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Discrete, integrated, virtual, CPU...
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    /// Geometry shader feature (required)
    pub geometry_shader: bool,
    /// Largest supported 2D image dimension
    pub max_image_dimension_2d: u32,
    /// Graphics/present queue family mapping
    pub queue_families: QueueFamilyIndices,
    /// Required device extensions the device lacks
    pub missing_extensions: Vec<String>,
    /// Surface reports at least one format and one present mode
    pub swapchain_adequate: bool,
}

impl DeviceProfile {
    /// Query a physical device against the target surface.
    ///
    /// # Safety
    /// The instance, surface, and physical device must be valid.
    pub unsafe fn query(
        instance: &ash::Instance,
        surface: &SurfaceContext,
        physical_device: vk::PhysicalDevice,
    ) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let features = instance.get_physical_device_features(physical_device);

        let available: Vec<String> = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default()
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let required: Vec<&str> = required_device_extensions()
            .iter()
            .filter_map(|name| name.to_str().ok())
            .collect();
        let missing_extensions = missing_extensions(&required, &available);

        // Surface support can only be asked once the swapchain extension is known to exist
        let swapchain_adequate = missing_extensions.is_empty()
            && surface
                .capabilities(physical_device)
                .map(|caps| !caps.formats.is_empty() && !caps.present_modes.is_empty())
                .unwrap_or(false);

        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        Self {
            device_name,
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_type: properties.device_type,
            api_version: properties.api_version,
            geometry_shader: features.geometry_shader == vk::TRUE,
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
            queue_families: QueueFamilyIndices::find(instance, surface, physical_device),
            missing_extensions,
            swapchain_adequate,
        }
    }

    /// Suitability score. Zero means the device cannot be used at all.
    pub fn score(&self) -> u64 {
        if !self.geometry_shader {
            return 0;
        }

        let mut score = BASE_SCORE;

        if self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += CHECKLIST_BONUS;
        }

        if self.queue_families.is_complete() {
            score += CHECKLIST_BONUS;
        }

        if self.missing_extensions.is_empty() && self.swapchain_adequate {
            score += CHECKLIST_BONUS;
        }

        score + u64::from(self.max_image_dimension_2d)
    }

    /// Whether the device can actually drive the renderer.
    pub fn is_usable(&self) -> bool {
        self.score() > 0
            && self.queue_families.is_complete()
            && self.missing_extensions.is_empty()
            && self.swapchain_adequate
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{}",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
        )
    }
}

/// Device extensions the renderer cannot run without.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// Features enabled on the logical device. Selection only accepts devices
/// that support all of them.
pub fn required_device_features() -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures::default().geometry_shader(true)
}

/// Names in `required` that do not appear in `available`, sorted.
pub fn missing_extensions(required: &[&str], available: &[String]) -> Vec<String> {
    let mut remaining: HashSet<&str> = required.iter().copied().collect();
    for name in available {
        remaining.remove(name.as_str());
    }

    let mut missing: Vec<String> = remaining.into_iter().map(String::from).collect();
    missing.sort();
    missing
}

/// Pick the candidate with the highest positive score.
///
/// Ties keep the earliest candidate.
pub fn pick_best<T>(candidates: impl IntoIterator<Item = (T, u64)>) -> Option<(T, u64)> {
    let mut best: Option<(T, u64)> = None;
    for (candidate, score) in candidates {
        if score == 0 {
            continue;
        }
        match &best {
            Some((_, best_score)) if *best_score >= score => {}
            _ => best = Some((candidate, score)),
        }
    }
    best
}

/// Pick the highest-scoring device that can drive a swapchain.
///
/// Unusable devices are skipped before ranking, so a discrete GPU without a
/// present queue never hides a usable integrated one.
pub fn pick_usable_device<T>(
    candidates: impl IntoIterator<Item = (T, DeviceProfile)>,
) -> Option<(T, DeviceProfile, u64)> {
    let usable = candidates.into_iter().filter_map(|(handle, profile)| {
        if profile.is_usable() {
            let score = profile.score();
            Some(((handle, profile), score))
        } else {
            tracing::debug!("Skipping unusable GPU {}", profile.device_name);
            None
        }
    });
    pick_best(usable).map(|((handle, profile), score)| (handle, profile, score))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> DeviceProfile {
        DeviceProfile {
            device_name: "Synthetic".to_string(),
            vendor: GpuVendor::Other(0),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version: vk::API_VERSION_1_1,
            geometry_shader: true,
            max_image_dimension_2d: 16384,
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            missing_extensions: Vec::new(),
            swapchain_adequate: true,
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn full_checklist_score() {
        assert_eq!(profile().score(), BASE_SCORE + 3 * CHECKLIST_BONUS + 16384);
    }

    #[test]
    fn integrated_device_scores_lower() {
        let discrete = profile();
        let mut integrated = profile();
        integrated.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;

        assert_eq!(discrete.score() - integrated.score(), CHECKLIST_BONUS);
    }

    #[test]
    fn missing_geometry_shader_scores_zero() {
        let mut p = profile();
        p.geometry_shader = false;
        assert_eq!(p.score(), 0);

        p.max_image_dimension_2d = u32::MAX;
        p.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        assert_eq!(p.score(), 0);
        assert!(!p.is_usable());
    }

    #[test]
    fn score_is_deterministic() {
        let p = profile();
        let first = p.score();
        for _ in 0..10 {
            assert_eq!(p.score(), first);
        }
        assert_eq!(p.clone().score(), first);
    }

    #[test]
    fn extensions_bonus_needs_adequate_swapchain() {
        let mut p = profile();
        p.swapchain_adequate = false;
        assert_eq!(p.score(), BASE_SCORE + 2 * CHECKLIST_BONUS + 16384);
        assert!(!p.is_usable());

        let mut p = profile();
        p.missing_extensions = vec!["VK_KHR_swapchain".to_string()];
        assert_eq!(p.score(), BASE_SCORE + 2 * CHECKLIST_BONUS + 16384);
    }

    #[test]
    fn incomplete_queue_families_lose_bonus() {
        let mut p = profile();
        p.queue_families.present = None;
        assert_eq!(p.score(), BASE_SCORE + 2 * CHECKLIST_BONUS + 16384);
        assert!(!p.is_usable());
    }

    #[test]
    fn missing_extensions_set_difference() {
        let available = vec![
            "VK_KHR_swapchain".to_string(),
            "VK_KHR_maintenance1".to_string(),
        ];
        assert!(missing_extensions(&["VK_KHR_swapchain"], &available).is_empty());
        assert_eq!(
            missing_extensions(&["VK_KHR_swapchain", "VK_B", "VK_A"], &available),
            vec!["VK_A".to_string(), "VK_B".to_string()]
        );
        assert_eq!(missing_extensions(&["VK_A"], &[]), vec!["VK_A".to_string()]);
    }

    #[test]
    fn pick_best_prefers_highest_score() {
        let picked = pick_best([("a", 10), ("b", 3000), ("c", 200)]);
        assert_eq!(picked, Some(("b", 3000)));
    }

    #[test]
    fn pick_best_keeps_first_on_tie() {
        assert_eq!(pick_best([("a", 5), ("b", 5)]), Some(("a", 5)));
    }

    #[test]
    fn pick_best_rejects_all_zero() {
        assert_eq!(pick_best([("a", 0), ("b", 0)]), None);
        assert_eq!(pick_best(Vec::<(&str, u64)>::new()), None);
    }

    #[test]
    fn device_features_match_the_selection_gate() {
        assert_eq!(required_device_features().geometry_shader, vk::TRUE);
    }

    #[test]
    fn unusable_top_scorer_falls_through() {
        let mut discrete = profile();
        discrete.device_name = "Discrete".to_string();
        discrete.max_image_dimension_2d = 32768;
        discrete.queue_families.present = None;

        let mut integrated = profile();
        integrated.device_name = "Integrated".to_string();
        integrated.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;

        assert!(discrete.score() > integrated.score());
        assert!(!discrete.is_usable());

        let (handle, picked, score) =
            pick_usable_device([("discrete", discrete), ("integrated", integrated.clone())])
                .unwrap();
        assert_eq!(handle, "integrated");
        assert_eq!(picked.device_name, "Integrated");
        assert_eq!(score, integrated.score());
    }

    #[test]
    fn no_usable_device() {
        let mut p = profile();
        p.swapchain_adequate = false;
        assert!(pick_usable_device([(0u32, p)]).is_none());
        assert!(pick_usable_device(Vec::<(u32, DeviceProfile)>::new()).is_none());
    }
}
