//! Validation-layer message routing.

use crate::error::Result;
use ash::vk;
use std::borrow::Cow;
use std::ffi::{c_void, CStr};

/// Severity bucket a validation message is logged at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Error,
    Warn,
    Info,
    Trace,
}

impl MessageLevel {
    /// Map a debug-utils severity to a log level.
    pub fn from_severity(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            Self::Error
        } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            Self::Warn
        } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            Self::Info
        } else {
            Self::Trace
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message) }.to_string_lossy()
    };

    match MessageLevel::from_severity(message_severity) {
        MessageLevel::Error => tracing::error!(target: "vulkan", "{:?}: {}", message_type, message),
        MessageLevel::Warn => tracing::warn!(target: "vulkan", "{:?}: {}", message_type, message),
        MessageLevel::Info => tracing::info!(target: "vulkan", "{:?}: {}", message_type, message),
        MessageLevel::Trace => tracing::trace!(target: "vulkan", "{:?}: {}", message_type, message),
    }

    // Never abort the call that triggered the message
    vk::FALSE
}

/// Messenger create info shared by instance creation and [`DebugMessenger::new`].
pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

/// Debug-utils messenger forwarding validation output to `tracing`.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Install the messenger.
    ///
    /// # Safety
    /// The instance must have been created with `VK_EXT_debug_utils` enabled.
    pub unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let messenger = unsafe { loader.create_debug_utils_messenger(&messenger_create_info(), None) }?;

        tracing::debug!("Debug messenger installed");

        Ok(Self { loader, messenger })
    }

    /// Destroy the messenger.
    ///
    /// # Safety
    /// Must run before the instance is destroyed.
    pub unsafe fn destroy(&self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_maps_to_level() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;

        assert_eq!(MessageLevel::from_severity(S::ERROR), MessageLevel::Error);
        assert_eq!(MessageLevel::from_severity(S::WARNING), MessageLevel::Warn);
        assert_eq!(MessageLevel::from_severity(S::INFO), MessageLevel::Info);
        assert_eq!(MessageLevel::from_severity(S::VERBOSE), MessageLevel::Trace);
        // Highest bit wins when several are set
        assert_eq!(
            MessageLevel::from_severity(S::WARNING | S::ERROR),
            MessageLevel::Error
        );
    }
}
