use serde::{Deserialize, Serialize};

/// Engine-wide calculation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalcSettings {
    /// Whether change notifications recalculate dependents.
    pub calculation_mode: CalculationMode,
    /// Whether a row/column removal notification recalculates the sheet.
    pub recalculate_on_structural_edit: bool,
}

impl Default for CalcSettings {
    fn default() -> Self {
        Self {
            calculation_mode: CalculationMode::Automatic,
            recalculate_on_structural_edit: true,
        }
    }
}

impl CalcSettings {
    #[must_use]
    pub fn is_manual(&self) -> bool {
        self.calculation_mode == CalculationMode::Manual
    }

    #[must_use]
    pub fn is_automatic(&self) -> bool {
        !self.is_manual()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalculationMode {
    #[default]
    Automatic,
    /// Only explicit `calculate_*` calls and variable updates recalculate.
    Manual,
}
