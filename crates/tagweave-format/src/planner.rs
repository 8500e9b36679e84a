//! Decides between splicing the tag region in place and rewriting the
//! whole file.

use crate::settings::SaveSettings;

/// Outcome of planning a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavePlan {
    pub rewrite: bool,
    /// Padding to leave after the tag region (gap reuse when splicing,
    /// preferred padding when rewriting).
    pub padding: u64,
}

/// Plans a save given the size of the existing tag region (tag plus any
/// adjacent padding), the size the new tag data will occupy, and the
/// smallest non-zero padding the format can represent (a filler element
/// needs a header).
///
/// With `force_rewrite` the preferred padding is used verbatim; a value
/// the format cannot represent (`0 < padding < min_filler`) is rejected
/// by the format writer rather than silently replaced here. Otherwise the
/// rewrite padding never leaves `min_padding..=max_padding`: when the
/// smallest representable filler would exceed `max_padding`, no padding
/// is written at all.
pub fn plan(
    existing_region: Option<u64>,
    new_size: u64,
    min_filler: u64,
    settings: &SaveSettings,
) -> SavePlan {
    let rewrite_padding = || {
        if settings.force_rewrite {
            return settings.preferred_padding;
        }
        let padding = if settings.min_padding > settings.max_padding {
            settings.preferred_padding
        } else {
            settings
                .preferred_padding
                .clamp(settings.min_padding, settings.max_padding)
        };
        if padding > 0 && padding < min_filler {
            // the filler floor must not push the padding out of the
            // configured window
            if min_filler <= settings.max_padding {
                min_filler
            } else {
                0
            }
        } else {
            padding
        }
    };

    if settings.force_rewrite {
        return SavePlan {
            rewrite: true,
            padding: rewrite_padding(),
        };
    }
    let Some(region) = existing_region else {
        return SavePlan {
            rewrite: true,
            padding: rewrite_padding(),
        };
    };
    if new_size > region {
        return SavePlan {
            rewrite: true,
            padding: rewrite_padding(),
        };
    }
    let gap = region - new_size;
    if gap == 0 {
        return SavePlan {
            rewrite: false,
            padding: 0,
        };
    }
    if gap >= min_filler && gap >= settings.min_padding && gap <= settings.max_padding {
        return SavePlan {
            rewrite: false,
            padding: gap,
        };
    }
    SavePlan {
        rewrite: true,
        padding: rewrite_padding(),
    }
}
