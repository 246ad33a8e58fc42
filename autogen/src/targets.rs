//! The files `autogen` knows how to generate.

use layergen::RegistryConfig;

/// The registry document a target is expanded against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    Vk,
    Video,
}

impl Source {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Vk => "vk.xml",
            Self::Video => "video.xml",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Target {
    pub name: &'static str,
    pub source: Source,
    pub template: &'static str,
}

pub const TARGETS: &[Target] = &[
    Target {
        name: "vk_dispatch_table.h",
        source: Source::Vk,
        template: DISPATCH_TABLE,
    },
    Target {
        name: "vk_enum_string_helper.h",
        source: Source::Vk,
        template: ENUM_STRING_HELPER,
    },
    Target {
        name: "vk_struct_size_helper.h",
        source: Source::Vk,
        template: STRUCT_SIZE_HELPER,
    },
    Target {
        name: "vk_layer_functions.cpp",
        source: Source::Vk,
        template: LAYER_FUNCTIONS,
    },
    Target {
        name: "vk_video_types.h",
        source: Source::Video,
        template: VIDEO_TYPES,
    },
];

pub fn find(name: &str) -> Option<&'static Target> {
    TARGETS.iter().find(|target| target.name == name)
}

/// Code spliced into the wrappers of functions that create or destroy dispatchable objects.
const STATE_TRACKING: &[(&str, &str)] = &[
    ("vkCreateInstance", "track_instance_creation(pCreateInfo, pInstance);"),
    ("vkDestroyInstance", "forget_instance(instance);"),
    ("vkCreateDevice", "track_device_creation(physicalDevice, pCreateInfo, pDevice);"),
    ("vkDestroyDevice", "forget_device(device);"),
];

/// The registry configuration every target is generated with.
pub fn config() -> RegistryConfig {
    STATE_TRACKING
        .iter()
        .fold(RegistryConfig::default(), |config, (function, code)| {
            config.with_state_tracking(function, code)
        })
}

const DISPATCH_TABLE: &str = r#"#pragma once

#include <vulkan/vulkan.h>

struct VkLayerInstanceDispatchTable {{
@foreach function where('{funcType}' == 'instance')
    PFN_{funcName} {funcShortName};
@end function
}};

struct VkLayerDeviceDispatchTable {{
@foreach function where('{funcType}' == 'device')
    PFN_{funcName} {funcShortName};
@end function
}};

static inline void layer_init_instance_dispatch_table(VkInstance instance, struct VkLayerInstanceDispatchTable* table, PFN_vkGetInstanceProcAddr gpa) {{
@foreach function where('{funcType}' == 'instance')
    table->{funcShortName} = (PFN_{funcName})gpa(instance, "{funcName}");
@end function
}}

static inline void layer_init_device_dispatch_table(VkDevice device, struct VkLayerDeviceDispatchTable* table, PFN_vkGetDeviceProcAddr gpa) {{
@foreach function where('{funcType}' == 'device')
    table->{funcShortName} = (PFN_{funcName})gpa(device, "{funcName}");
@end function
}}
"#;

const ENUM_STRING_HELPER: &str = r#"#pragma once

#include <vulkan/vulkan.h>

@foreach enum
static inline const char* string_{enumName}({enumName} value) {{
    switch (value) {{
@foreach option
        case {optName}:
            return "{optName}";
@end option
        default:
            return "Unhandled {enumName}";
    }}
}}

@end enum
@foreach bitmask where({bitWidth} == 32)
static inline const char* string_{bitName}({bitName} value) {{
    switch (value) {{
@foreach option where(not {optMultiValue})
        case {optName}:
            return "{optName}";
@end option
        default:
            return "Unhandled {bitName}";
    }}
}}

@end bitmask
"#;

const STRUCT_SIZE_HELPER: &str = r#"#pragma once

#include <stddef.h>
#include <vulkan/vulkan.h>

// Returns the size of a struct that can appear in a pNext chain, or 0 when its type is unknown.
static inline size_t get_pnext_struct_size(const void* next) {{
    switch (((const VkBaseInStructure*)next)->sType) {{
@foreach struct where({sctStructureTypeIndex} != -1)
        case (VkStructureType){sctStructureTypeIndex}:
            return sizeof({sctName});
@end struct
        default:
            return 0;
    }}
}}
"#;

const LAYER_FUNCTIONS: &str = r#"#include "vk_dispatch_table.h"
#include "vk_layer_support.h"

@foreach function where('{funcName}' not in ['vkGetInstanceProcAddr', 'vkGetDeviceProcAddr'])
VKAPI_ATTR {funcReturn} VKAPI_CALL layer_{funcShortName}({funcTypedParams}) {{
@if({funcSafeToPrint})
@foreach parameter
    log_param("{funcName}", "{prmName}", {prmName});
@end parameter
@end if
@if("{funcStateTrackingCode}" != "")
    {funcStateTrackingCode}
@end if
@if('{funcReturn}' == 'void')
    {funcType}_dispatch_table({funcDispatchParam})->{funcShortName}({funcNamedParams});
@end if
@if('{funcReturn}' != 'void')
    return {funcType}_dispatch_table({funcDispatchParam})->{funcShortName}({funcNamedParams});
@end if
}}

@end function
"#;

const VIDEO_TYPES: &str = r#"#pragma once

#include <stdint.h>

@foreach enum
#define {enumName}_OPTION_COUNT {enumOptionCount}
@end enum

@foreach struct
// {sctName}
@foreach member
//     {memDeclaration}
@end member
@end struct
"#;
