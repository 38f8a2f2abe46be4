#![allow(non_upper_case_globals)]
#![allow(non_snake_case)]
#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

ISQ!(
    uom::si,
    f32,
    (meter, kilogram, second, ampere, kelvin, mole, candela)
);

#[cfg(test)]
mod tests {
    use super::{ElectricCurrent, ElectricPotential, ElectricalResistance};
    use approx::assert_relative_eq;
    use uom::si::{
        electric_current::{ampere, milliampere},
        electric_potential::{millivolt, volt},
        electrical_resistance::{milliohm, ohm},
    };

    #[test]
    fn test_units() {
        let current = ElectricCurrent::new::<milliampere>(950.0);
        let potential = ElectricPotential::new::<volt>(3.73);
        let shunt = ElectricalResistance::new::<milliohm>(5.0);

        assert_relative_eq!(current.get::<ampere>(), 0.95);
        assert_relative_eq!(potential.get::<millivolt>(), 3730.0);
        assert_relative_eq!(shunt.get::<ohm>(), 0.005);
    }

    #[test]
    fn ohms_law() {
        let sense = ElectricPotential::new::<millivolt>(5.0);
        let shunt = ElectricalResistance::new::<milliohm>(5.0);
        let current: ElectricCurrent = sense / shunt;
        assert_relative_eq!(current.get::<ampere>(), 1.0, epsilon = 1e-6);
    }
}
