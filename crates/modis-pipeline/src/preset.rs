//! Product presets.
//!
//! Each supported MODIS product family maps to one static row of defaults.
//! Resolution is pure and table-driven; callers may layer
//! [`ParameterOverrides`] on top, or select `custom` and supply everything
//! themselves.

use raster_engine::{
    CellSize, ColormapMode, Comparison, MosaicMethod, NodataPredicate, PixelType,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::stage::StageKind;

/// Supported product families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Preset {
    Mod13Ndvi,
    Mod13Evi,
    Mod16Et,
    Mod16Pet,
    Mod11a2Lst,
    Mod17a2Gpp,
    Mod17a3Npp,
    Mod15a2Lai,
}

impl Preset {
    pub const ALL: [Preset; 8] = [
        Preset::Mod13Ndvi,
        Preset::Mod13Evi,
        Preset::Mod16Et,
        Preset::Mod16Pet,
        Preset::Mod11a2Lst,
        Preset::Mod17a2Gpp,
        Preset::Mod17a3Npp,
        Preset::Mod15a2Lai,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mod13Ndvi => "MOD13_NDVI",
            Self::Mod13Evi => "MOD13_EVI",
            Self::Mod16Et => "MOD16_ET",
            Self::Mod16Pet => "MOD16_PET",
            Self::Mod11a2Lst => "MOD11A2_LST",
            Self::Mod17a2Gpp => "MOD17A2_GPP",
            Self::Mod17a3Npp => "MOD17A3_NPP",
            Self::Mod15a2Lai => "MOD15A2_LAI",
        }
    }

    /// The static table row for this preset.
    pub fn profile(&self) -> &'static PresetProfile {
        // PRESET_TABLE is ordered like Preset::ALL.
        &PRESET_TABLE[*self as usize]
    }
}

impl FromStr for Preset {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| PipelineError::UnknownPreset(s.to_string()))
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Preset {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Preset> for String {
    fn from(value: Preset) -> Self {
        value.as_str().to_string()
    }
}

/// A named preset, or `custom` for fully caller-supplied parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetSelector {
    Named(Preset),
    Custom,
}

impl PresetSelector {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Named(p) => p.as_str(),
            Self::Custom => "custom",
        }
    }
}

impl FromStr for PresetSelector {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("custom") {
            Ok(Self::Custom)
        } else {
            s.parse().map(Self::Named)
        }
    }
}

impl fmt::Display for PresetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which stages a run contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageLayout {
    /// extract, mosaic, reproject, clip, scale
    FiveStage,
    /// extract, mosaic, reproject, clip, set null, scale
    SixStage,
}

impl StageLayout {
    pub fn kinds(&self) -> &'static [StageKind] {
        match self {
            Self::FiveStage => &[
                StageKind::Extract,
                StageKind::Mosaic,
                StageKind::Reproject,
                StageKind::Clip,
                StageKind::Multiply,
            ],
            Self::SixStage => &[
                StageKind::Extract,
                StageKind::Mosaic,
                StageKind::Reproject,
                StageKind::Clip,
                StageKind::SetNull,
                StageKind::Multiply,
            ],
        }
    }

    pub fn stage_count(&self) -> usize {
        self.kinds().len()
    }

    /// Stage directory names, e.g. `1_extract` .. `5_scale`.
    pub fn dir_names(&self) -> Vec<String> {
        self.kinds()
            .iter()
            .enumerate()
            .map(|(i, kind)| format!("{}_{}", i + 1, kind.dir_suffix()))
            .collect()
    }

    pub fn has_mask_stage(&self) -> bool {
        matches!(self, Self::SixStage)
    }
}

/// One static row of product defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresetProfile {
    pub preset: Preset,
    pub sds_index: u32,
    pub band_name: &'static str,
    pub pixel_type: PixelType,
    pub scale_factor: f64,
    pub nodata: Option<NodataPredicate>,
    pub cell_size: Option<CellSize>,
    pub layout: StageLayout,
}

const fn gt(threshold: f64) -> Option<NodataPredicate> {
    Some(NodataPredicate {
        op: Comparison::Gt,
        threshold,
    })
}

const fn square(size: f64) -> Option<CellSize> {
    Some(CellSize { x: size, y: size })
}

/// Product defaults, ordered like [`Preset::ALL`].
pub const PRESET_TABLE: [PresetProfile; 8] = [
    PresetProfile {
        preset: Preset::Mod13Ndvi,
        sds_index: 0,
        band_name: "NDVI",
        pixel_type: PixelType::I16,
        scale_factor: 0.0001,
        nodata: None,
        cell_size: None,
        layout: StageLayout::FiveStage,
    },
    PresetProfile {
        preset: Preset::Mod13Evi,
        sds_index: 1,
        band_name: "EVI",
        pixel_type: PixelType::I16,
        scale_factor: 0.0001,
        nodata: None,
        cell_size: None,
        layout: StageLayout::FiveStage,
    },
    PresetProfile {
        preset: Preset::Mod16Et,
        sds_index: 0,
        band_name: "ET",
        pixel_type: PixelType::U16,
        scale_factor: 0.1,
        nodata: gt(32700.0),
        cell_size: None,
        layout: StageLayout::SixStage,
    },
    PresetProfile {
        preset: Preset::Mod16Pet,
        sds_index: 2,
        band_name: "PET",
        pixel_type: PixelType::U16,
        scale_factor: 0.1,
        nodata: gt(32700.0),
        cell_size: None,
        layout: StageLayout::SixStage,
    },
    PresetProfile {
        preset: Preset::Mod11a2Lst,
        sds_index: 0,
        band_name: "LST",
        pixel_type: PixelType::U16,
        scale_factor: 0.02,
        nodata: Some(NodataPredicate {
            op: Comparison::Lt,
            threshold: 7500.0,
        }),
        cell_size: square(1000.0),
        layout: StageLayout::SixStage,
    },
    PresetProfile {
        preset: Preset::Mod17a2Gpp,
        sds_index: 0,
        band_name: "GPP",
        pixel_type: PixelType::I16,
        scale_factor: 0.0001,
        nodata: gt(30000.0),
        cell_size: square(500.0),
        layout: StageLayout::SixStage,
    },
    PresetProfile {
        preset: Preset::Mod17a3Npp,
        sds_index: 0,
        band_name: "NPP",
        pixel_type: PixelType::I16,
        scale_factor: 0.0001,
        nodata: gt(32700.0),
        cell_size: square(500.0),
        layout: StageLayout::SixStage,
    },
    PresetProfile {
        preset: Preset::Mod15a2Lai,
        sds_index: 1,
        band_name: "LAI",
        pixel_type: PixelType::U8,
        scale_factor: 0.1,
        nodata: gt(100.0),
        cell_size: square(500.0),
        layout: StageLayout::SixStage,
    },
];

/// Fully resolved product parameters for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductParameters {
    /// Subdataset to extract; engine default when unset
    pub sds_index: Option<u32>,
    /// Band name appended to extracted file names
    pub band_name: String,
    pub pixel_type: PixelType,
    pub scale_factor: f64,
    /// Cells matching this predicate become nodata (six-stage runs only)
    pub nodata: Option<NodataPredicate>,
    /// Default output cell size of the reprojection
    pub cell_size: Option<CellSize>,
    pub mosaic_method: MosaicMethod,
    pub colormap_mode: ColormapMode,
    pub layout: StageLayout,
}

impl From<&PresetProfile> for ProductParameters {
    fn from(profile: &PresetProfile) -> Self {
        Self {
            sds_index: Some(profile.sds_index),
            band_name: profile.band_name.to_string(),
            pixel_type: profile.pixel_type,
            scale_factor: profile.scale_factor,
            nodata: profile.nodata,
            cell_size: profile.cell_size,
            mosaic_method: MosaicMethod::default(),
            colormap_mode: ColormapMode::default(),
            layout: profile.layout,
        }
    }
}

impl ProductParameters {
    /// Check values no preset could produce but a caller could supply.
    pub fn validate(&self) -> Result<()> {
        if self.band_name.trim().is_empty() {
            return Err(PipelineError::invalid_parameter("band name must not be empty"));
        }
        if self.band_name.contains(['/', '\\']) {
            return Err(PipelineError::invalid_parameter(format!(
                "band name '{}' must not contain path separators",
                self.band_name
            )));
        }
        if !self.scale_factor.is_finite() {
            return Err(PipelineError::invalid_parameter(format!(
                "scale factor {} is not a finite number",
                self.scale_factor
            )));
        }
        if self.layout == StageLayout::SixStage && self.nodata.is_none() {
            return Err(PipelineError::invalid_parameter(
                "six-stage layout requires a nodata predicate",
            ));
        }
        Ok(())
    }
}

/// Caller edits applied on top of a preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterOverrides {
    pub sds_index: Option<u32>,
    pub band_name: Option<String>,
    pub pixel_type: Option<PixelType>,
    pub scale_factor: Option<f64>,
    pub nodata: Option<NodataPredicate>,
    pub cell_size: Option<CellSize>,
    pub mosaic_method: Option<MosaicMethod>,
    pub colormap_mode: Option<ColormapMode>,
}

impl ParameterOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Resolve a named preset to its defaults.
pub fn resolve(preset: Preset) -> ProductParameters {
    preset.profile().into()
}

/// Resolve a selector and apply overrides.
///
/// Named presets keep their layout: a nodata override on a five-stage
/// preset is ignored. `custom` always runs six stages and requires band
/// name, pixel type, scale factor and a nodata predicate.
pub fn resolve_selector(
    selector: PresetSelector,
    overrides: &ParameterOverrides,
) -> Result<ProductParameters> {
    let params = match selector {
        PresetSelector::Named(preset) => {
            let mut params = resolve(preset);
            if overrides.nodata.is_some() && params.layout == StageLayout::FiveStage {
                warn!(
                    preset = %preset,
                    "Ignoring nodata override: preset has no set-null stage"
                );
            }
            apply(&mut params, overrides);
            if params.layout == StageLayout::FiveStage {
                params.nodata = None;
            }
            params
        }
        PresetSelector::Custom => {
            let missing = |field: &str| {
                PipelineError::invalid_parameter(format!("custom preset requires {}", field))
            };
            ProductParameters {
                sds_index: overrides.sds_index,
                band_name: overrides.band_name.clone().ok_or_else(|| missing("band_name"))?,
                pixel_type: overrides.pixel_type.ok_or_else(|| missing("pixel_type"))?,
                scale_factor: overrides.scale_factor.ok_or_else(|| missing("scale_factor"))?,
                nodata: Some(overrides.nodata.ok_or_else(|| missing("nodata"))?),
                cell_size: overrides.cell_size,
                mosaic_method: overrides.mosaic_method.unwrap_or_default(),
                colormap_mode: overrides.colormap_mode.unwrap_or_default(),
                layout: StageLayout::SixStage,
            }
        }
    };

    params.validate()?;
    Ok(params)
}

fn apply(params: &mut ProductParameters, overrides: &ParameterOverrides) {
    if let Some(index) = overrides.sds_index {
        params.sds_index = Some(index);
    }
    if let Some(name) = &overrides.band_name {
        params.band_name = name.clone();
    }
    if let Some(pixel_type) = overrides.pixel_type {
        params.pixel_type = pixel_type;
    }
    if let Some(factor) = overrides.scale_factor {
        params.scale_factor = factor;
    }
    if let Some(nodata) = overrides.nodata {
        params.nodata = Some(nodata);
    }
    if let Some(cell_size) = overrides.cell_size {
        params.cell_size = Some(cell_size);
    }
    if let Some(method) = overrides.mosaic_method {
        params.mosaic_method = method;
    }
    if let Some(mode) = overrides.colormap_mode {
        params.colormap_mode = mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order_matches_enum() {
        for preset in Preset::ALL {
            assert_eq!(preset.profile().preset, preset);
        }
    }

    #[test]
    fn test_resolve_mod13_ndvi() {
        let p = resolve(Preset::Mod13Ndvi);
        assert_eq!(p.sds_index, Some(0));
        assert_eq!(p.band_name, "NDVI");
        assert_eq!(p.pixel_type, PixelType::I16);
        assert_eq!(p.scale_factor, 0.0001);
        assert_eq!(p.nodata, None);
        assert_eq!(p.layout, StageLayout::FiveStage);
        assert!(!p.layout.has_mask_stage());
    }

    #[test]
    fn test_resolve_mod16_et() {
        let p = resolve(Preset::Mod16Et);
        assert_eq!(p.sds_index, Some(0));
        assert_eq!(p.band_name, "ET");
        assert_eq!(p.pixel_type, PixelType::U16);
        assert_eq!(p.scale_factor, 0.1);
        assert_eq!(p.nodata, Some(NodataPredicate::greater_than(32700.0)));
        assert_eq!(p.layout, StageLayout::SixStage);
    }

    #[test]
    fn test_resolve_is_deterministic() {
        for preset in Preset::ALL {
            assert_eq!(resolve(preset), resolve(preset));
        }
    }

    #[test]
    fn test_remaining_rows() {
        let lst = resolve(Preset::Mod11a2Lst);
        assert_eq!(lst.nodata, Some(NodataPredicate::less_than(7500.0)));
        assert_eq!(lst.cell_size, Some(CellSize::square(1000.0)));
        assert_eq!(lst.scale_factor, 0.02);

        let lai = resolve(Preset::Mod15a2Lai);
        assert_eq!(lai.sds_index, Some(1));
        assert_eq!(lai.pixel_type, PixelType::U8);
        assert_eq!(lai.nodata, Some(NodataPredicate::greater_than(100.0)));

        assert_eq!(resolve(Preset::Mod16Pet).sds_index, Some(2));
        assert_eq!(
            resolve(Preset::Mod17a2Gpp).nodata,
            Some(NodataPredicate::greater_than(30000.0))
        );
        assert_eq!(resolve(Preset::Mod17a3Npp).cell_size, Some(CellSize::square(500.0)));
        assert_eq!(resolve(Preset::Mod13Evi).band_name, "EVI");

        for preset in Preset::ALL {
            let p = resolve(preset);
            assert_eq!(p.mosaic_method, MosaicMethod::Maximum);
            assert_eq!(p.colormap_mode, ColormapMode::First);
        }
    }

    #[test]
    fn test_preset_parse() {
        assert_eq!("MOD13_NDVI".parse::<Preset>().unwrap(), Preset::Mod13Ndvi);
        assert_eq!("mod11a2-lst".parse::<Preset>().unwrap(), Preset::Mod11a2Lst);
        assert!(matches!(
            "MOD99_XYZ".parse::<Preset>(),
            Err(PipelineError::UnknownPreset(_))
        ));
        assert_eq!("Custom".parse::<PresetSelector>().unwrap(), PresetSelector::Custom);
        assert_eq!(
            "MOD16_ET".parse::<PresetSelector>().unwrap(),
            PresetSelector::Named(Preset::Mod16Et)
        );
    }

    #[test]
    fn test_layout_dirs() {
        assert_eq!(
            StageLayout::FiveStage.dir_names(),
            ["1_extract", "2_mosaic", "3_reproject", "4_clip", "5_scale"]
        );
        assert_eq!(
            StageLayout::SixStage.dir_names(),
            ["1_extract", "2_mosaic", "3_reproject", "4_clip", "5_setn", "6_scale"]
        );
    }

    #[test]
    fn test_overrides_apply_to_named_preset() {
        let overrides = ParameterOverrides {
            scale_factor: Some(0.5),
            mosaic_method: Some(MosaicMethod::Last),
            ..Default::default()
        };
        let p = resolve_selector(PresetSelector::Named(Preset::Mod16Pet), &overrides).unwrap();
        assert_eq!(p.scale_factor, 0.5);
        assert_eq!(p.mosaic_method, MosaicMethod::Last);
        assert_eq!(p.band_name, "PET");
    }

    #[test]
    fn test_nodata_override_ignored_for_five_stage() {
        let overrides = ParameterOverrides {
            nodata: Some(NodataPredicate::greater_than(1.0)),
            ..Default::default()
        };
        let p = resolve_selector(PresetSelector::Named(Preset::Mod13Ndvi), &overrides).unwrap();
        assert_eq!(p.nodata, None);
        assert_eq!(p.layout, StageLayout::FiveStage);
    }

    #[test]
    fn test_custom_requires_core_fields() {
        let err = resolve_selector(PresetSelector::Custom, &ParameterOverrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("band_name"));
    }

    #[test]
    fn test_custom_always_runs_set_null() {
        let mut overrides = ParameterOverrides {
            band_name: Some("Fpar".to_string()),
            pixel_type: Some(PixelType::U8),
            scale_factor: Some(0.01),
            ..Default::default()
        };
        let err = resolve_selector(PresetSelector::Custom, &overrides).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParameter(_)));
        assert!(err.to_string().contains("nodata"));

        overrides.nodata = Some(NodataPredicate::greater_than(100.0));
        let p = resolve_selector(PresetSelector::Custom, &overrides).unwrap();
        assert_eq!(p.layout, StageLayout::SixStage);
        assert_eq!(p.nodata, Some(NodataPredicate::greater_than(100.0)));
        assert_eq!(p.sds_index, None);
    }

    #[test]
    fn test_validate_rejects_bad_band_name() {
        let overrides = ParameterOverrides {
            band_name: Some("a/b".to_string()),
            ..Default::default()
        };
        assert!(resolve_selector(PresetSelector::Named(Preset::Mod13Ndvi), &overrides).is_err());
    }

    #[test]
    fn test_overrides_deserialize_toolbox_spellings() {
        let json = r#"{"pixel_type": "16_BIT_UNSIGNED", "nodata": "VALUE > 65528"}"#;
        let o: ParameterOverrides = serde_json::from_str(json).unwrap();
        assert_eq!(o.pixel_type, Some(PixelType::U16));
        assert_eq!(o.nodata, Some(NodataPredicate::greater_than(65528.0)));
        assert!(ParameterOverrides::default().is_empty());
    }
}
