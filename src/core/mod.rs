mod engine;
mod finance;
mod types;
mod validate;

pub use engine::{capital_gains_tax, rank_scenarios, run_simulation, simulate};
pub use finance::{
    amortizing_payment, annual_to_monthly_rate, months_between, pct_to_decimal, years_between,
};
pub use types::{
    CapitalGainsRule, DEFAULT_HORIZON_YEARS, DerivedFacts, IncomePotential, Inputs,
    MAX_HORIZON_YEARS, OptionalAssumptions, ParseYearMonthError, RankMetric, RefinanceMeta,
    RefinanceTerms, RentalCosts, RequiredInputs, SaleOutcome, Scenario, ScenarioYear,
    SimulationConfig, SimulationMeta, SimulationResult, YearMonth, YearRow,
};
pub use validate::{ValidationError, ValidationErrors, derive_facts, validate};
