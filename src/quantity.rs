//! Quantity Registry (module A): maps physical quantity names to base
//! units, with alias resolution. Grounded on
//! `original_source/HopsanCore/src/Quantities.cc`.

use fxhash::FxHashMap;

/// Process-wide (or per-engine, see [`crate::HopsanEssentials`]) table of known
/// physical quantities and their base SI units, plus quantity aliases.
#[derive(Debug, Clone)]
pub struct QuantityRegistry {
    quantity_to_base_unit: FxHashMap<String, String>,
    aliases: FxHashMap<String, String>,
}

impl Default for QuantityRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl QuantityRegistry {
    /// An empty registry with no quantities registered.
    pub fn empty() -> Self {
        QuantityRegistry {
            quantity_to_base_unit: FxHashMap::default(),
            aliases: FxHashMap::default(),
        }
    }

    /// The built-in set of base quantities from spec §6.
    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        let builtins: &[(&str, &str)] = &[
            ("Pressure", "Pa"),
            ("Flow", "m^3/s"),
            ("Force", "N"),
            ("Position", "m"),
            ("Velocity", "m/s"),
            ("Acceleration", "m/s^2"),
            ("Torque", "Nm"),
            ("Angle", "rad"),
            ("AngularVelocity", "rad/s"),
            ("Frequency", "Hz"),
            ("Time", "s"),
            ("Voltage", "V"),
            ("Current", "A"),
            ("Mass", "kg"),
            ("Area", "m^2"),
            ("Volume", "m^3"),
            ("Displacement", "m^3/rev"),
            ("Density", "kg/m^3"),
            ("Temperature", "K"),
            ("Resistance", "Ω"),
            ("Momentum", "kg·m/s"),
            ("Energy", "J"),
            ("Power", "J/s"),
        ];
        for (quantity, unit) in builtins {
            reg.register_quantity(quantity, unit);
        }
        reg.register_alias("Position", "Length");
        reg.register_alias("Pressure", "Stress");
        reg
    }

    pub fn register_quantity(&mut self, quantity: &str, base_unit: &str) {
        self.quantity_to_base_unit
            .insert(quantity.to_string(), base_unit.to_string());
    }

    /// Registers `alias` as another name for `quantity`.
    pub fn register_alias(&mut self, quantity: &str, alias: &str) {
        self.aliases.insert(alias.to_string(), quantity.to_string());
    }

    /// Returns the base unit for `quantity`, resolving through the alias
    /// table first, or the empty string if unknown. Alias-first order is
    /// load-bearing: see `original_source/HopsanCore/src/Quantities.cc`.
    pub fn lookup_base_unit(&self, quantity: &str) -> String {
        if let Some(real) = self.aliases.get(quantity) {
            self.quantity_to_base_unit
                .get(real)
                .cloned()
                .unwrap_or_default()
        } else {
            self.quantity_to_base_unit
                .get(quantity)
                .cloned()
                .unwrap_or_default()
        }
    }

    pub fn has_quantity(&self, quantity: &str) -> bool {
        self.aliases.contains_key(quantity) || self.quantity_to_base_unit.contains_key(quantity)
    }

    /// Classifies a free string `s` as either a known quantity (returning
    /// its base unit) or treats it as an already-concrete unit (returning
    /// itself unchanged).
    pub fn check_if_quantity_or_unit(&self, s: &str) -> String {
        if self.has_quantity(s) {
            self.lookup_base_unit(s)
        } else {
            s.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_pressure() {
        let reg = QuantityRegistry::with_builtins();
        assert_eq!(reg.lookup_base_unit("Pressure"), "Pa");
    }

    #[test]
    fn alias_resolves_through_to_base_unit() {
        let reg = QuantityRegistry::with_builtins();
        assert_eq!(reg.lookup_base_unit("Length"), "m");
        assert_eq!(reg.lookup_base_unit("Stress"), "Pa");
    }

    #[test]
    fn unknown_quantity_is_empty() {
        let reg = QuantityRegistry::with_builtins();
        assert_eq!(reg.lookup_base_unit("Nonsense"), "");
    }

    #[test]
    fn check_if_quantity_or_unit_passes_through_unknown() {
        let reg = QuantityRegistry::with_builtins();
        assert_eq!(reg.check_if_quantity_or_unit("Pressure"), "Pa");
        assert_eq!(reg.check_if_quantity_or_unit("rad/s"), "rad/s");
    }
}
