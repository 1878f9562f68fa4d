use auto_ops::impl_op_ex;
use serde::{Deserialize, Serialize};

/// A four-momentum in (px, py, pz, E) component order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec4([f64; 4]);

impl From<[f64; 4]> for Vec4 {
    fn from(value: [f64; 4]) -> Self {
        Self(value)
    }
}

impl Vec4 {
    pub fn new(px: f64, py: f64, pz: f64, e: f64) -> Self {
        Self([px, py, pz, e])
    }

    /// Build a four-momentum from collider coordinates.
    ///
    /// The energy is taken as $`\sqrt{m^2 + |\vec{p}|^2}`$ with
    /// $`|\vec{p}| = p_T \cosh\eta`$.
    pub fn from_pt_eta_phi_m(pt: f64, eta: f64, phi: f64, m: f64) -> Self {
        let px = pt * phi.cos();
        let py = pt * phi.sin();
        let pz = pt * eta.sinh();
        let p = pt * eta.cosh();
        let e = (m * m + p * p).sqrt();
        Self([px, py, pz, e])
    }

    pub fn px(&self) -> f64 {
        self.0[0]
    }
    pub fn py(&self) -> f64 {
        self.0[1]
    }
    pub fn pz(&self) -> f64 {
        self.0[2]
    }
    pub fn e(&self) -> f64 {
        self.0[3]
    }

    /// Transverse momentum.
    pub fn pt(&self) -> f64 {
        self.px().hypot(self.py())
    }

    /// Pseudorapidity.
    pub fn eta(&self) -> f64 {
        (self.pz() / self.pt()).asinh()
    }

    /// Azimuthal angle in $`(-\pi, \pi]`$.
    pub fn phi(&self) -> f64 {
        self.py().atan2(self.px())
    }

    pub fn p2(&self) -> f64 {
        self.px() * self.px() + self.py() * self.py() + self.pz() * self.pz()
    }

    pub fn mag2(&self) -> f64 {
        self.e() * self.e() - self.p2()
    }

    /// Invariant mass (the square root of [`Vec4::mag2`] clamped at zero).
    pub fn mag(&self) -> f64 {
        self.mag2().max(0.0).sqrt()
    }

    /// Angular separation $`\Delta R = \sqrt{\Delta\eta^2 + \Delta\phi^2}`$
    /// with the azimuthal difference wrapped into $`(-\pi, \pi]`$.
    pub fn delta_r(&self, other: &Vec4) -> f64 {
        delta_r(self.eta(), self.phi(), other.eta(), other.phi())
    }

    pub fn add(&self, other: &Self) -> Self {
        Self([
            self.px() + other.px(),
            self.py() + other.py(),
            self.pz() + other.pz(),
            self.e() + other.e(),
        ])
    }
    pub fn sub(&self, other: &Self) -> Self {
        Self([
            self.px() - other.px(),
            self.py() - other.py(),
            self.pz() - other.pz(),
            self.e() - other.e(),
        ])
    }
    pub fn neg(&self) -> Self {
        Self([-self.px(), -self.py(), -self.pz(), -self.e()])
    }

    pub fn to_p4_string(&self) -> String {
        format!(
            "[px = {}, py = {}, pz = {}, e = {}]",
            self.px(),
            self.py(),
            self.pz(),
            self.e()
        )
    }
}

impl_op_ex!(+ |a: &Vec4, b: &Vec4| -> Vec4 { a.add(b) });
impl_op_ex!(-|a: &Vec4, b: &Vec4| -> Vec4 { a.sub(b) });
impl_op_ex!(-|a: &Vec4| -> Vec4 { a.neg() });

impl std::iter::Sum for Vec4 {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Vec4::default(), |acc, p4| acc + p4)
    }
}

/// Angular separation of two (eta, phi) directions.
pub fn delta_r(eta_a: f64, phi_a: f64, eta_b: f64, phi_b: f64) -> f64 {
    let deta = eta_a - eta_b;
    let mut dphi = phi_a - phi_b;
    while dphi > std::f64::consts::PI {
        dphi -= 2.0 * std::f64::consts::PI;
    }
    while dphi < -std::f64::consts::PI {
        dphi += 2.0 * std::f64::consts::PI;
    }
    (deta * deta + dphi * dphi).sqrt()
}
