use tracing::debug;

use super::finance::{amortizing_payment, annual_to_monthly_rate};
use super::types::{
    CapitalGainsRule, DerivedFacts, IncomePotential, Inputs, RankMetric, RefinanceMeta,
    RefinanceTerms, SaleOutcome, Scenario, ScenarioYear, SimulationConfig, SimulationMeta,
    SimulationResult, YearMonth, YearRow,
};
use super::validate::{ValidationErrors, validate};

/// Years in the home after which a sale is treated as fully excluded from capital gains tax.
const RESIDENCY_EXCLUSION_YEARS: f64 = 2.0;

/// Balances below half a cent count as paid off.
const LOAN_PAID_EPSILON: f64 = 0.005;

#[derive(Debug, Clone)]
struct ScenarioState {
    scenario: Scenario,
    home_value: f64,
    loan_balance: f64,
    loan_rate: f64,
    amortization_payment: f64,
    cash_flow_payment: f64,
    invest: f64,
    drag: f64,
    rental_income_ytd: f64,
}

impl ScenarioState {
    fn stocks(&self) -> f64 {
        self.invest + self.drag
    }

    fn home_equity(&self) -> f64 {
        self.home_value - self.loan_balance
    }

    fn net_worth(&self) -> f64 {
        self.stocks() + self.home_equity()
    }

    fn route_cash_flow(&mut self, net: f64) {
        if net >= 0.0 {
            self.invest += net;
        } else {
            self.drag += net;
        }
    }

    /// Pays one month of P&I and returns the amount charged to cash flow.
    fn amortize_month(&mut self) -> f64 {
        if self.loan_balance <= 0.0 {
            return 0.0;
        }

        let interest = self.loan_balance * (self.loan_rate / 12.0);
        let principal = (self.amortization_payment - interest)
            .max(0.0)
            .min(self.loan_balance);
        self.loan_balance -= principal;
        if self.loan_balance < LOAN_PAID_EPSILON {
            self.loan_balance = 0.0;
        }
        self.cash_flow_payment
    }

    fn rental_month(&mut self, costs: &MonthlyCosts, rates: &MonthlyRates) -> f64 {
        let operating = costs.rent * rates.operating_cost_fraction;
        let payment = self.amortize_month();
        let net = costs.rent - operating - payment - costs.property_tax - costs.insurance;
        let net = apply_rental_tax(net, rates.rental_tax_rate);
        self.route_cash_flow(net);
        self.rental_income_ytd += net;
        net
    }

    fn snapshot(&self, withdrawal_rate: Option<f64>) -> ScenarioYear {
        let stocks = self.stocks();
        let rental_income = self.rental_income_ytd;
        let income_potential = withdrawal_rate.map(|rate| {
            let withdrawal_income = stocks.max(0.0) * rate;
            IncomePotential {
                withdrawal_income,
                rental_income,
                total: withdrawal_income + rental_income,
            }
        });

        ScenarioYear {
            scenario: self.scenario,
            net_worth: self.net_worth(),
            stocks,
            home_equity: self.home_equity(),
            rental_income,
            income_potential,
        }
    }

    fn close_year(&mut self, withdrawal_rate: Option<f64>) -> ScenarioYear {
        let year = self.snapshot(withdrawal_rate);
        self.rental_income_ytd = 0.0;
        year
    }
}

#[derive(Debug, Clone, Copy)]
struct MonthlyCosts {
    rent: f64,
    property_tax: f64,
    insurance: f64,
}

impl MonthlyCosts {
    fn inflate(&mut self, monthly_rate: f64) {
        let factor = 1.0 + monthly_rate;
        self.rent *= factor;
        self.property_tax *= factor;
        self.insurance *= factor;
    }
}

#[derive(Debug, Clone, Copy)]
struct MonthlyRates {
    market: f64,
    appreciation: f64,
    inflation: f64,
    operating_cost_fraction: f64,
    rental_tax_rate: f64,
}

fn apply_rental_tax(net: f64, rental_tax_rate: f64) -> f64 {
    if net > 0.0 && rental_tax_rate > 0.0 {
        net * (1.0 - rental_tax_rate)
    } else {
        net
    }
}

/// Simplified sale tax: a 2-year residency excludes the gain, and no basis means no gain.
pub fn capital_gains_tax(
    sale_price: f64,
    years_resided: Option<f64>,
    cost_basis: Option<f64>,
    rate: f64,
) -> (f64, CapitalGainsRule) {
    if years_resided.unwrap_or(0.0) >= RESIDENCY_EXCLUSION_YEARS {
        return (0.0, CapitalGainsRule::ResidencyExclusion);
    }
    match cost_basis {
        None => (0.0, CapitalGainsRule::NoCostBasis),
        Some(basis) => {
            let gain = (sale_price - basis).max(0.0);
            (gain * rate, CapitalGainsRule::Taxable { rate })
        }
    }
}

fn sell_home(
    state: &mut ScenarioState,
    inputs: &Inputs,
    derived: &DerivedFacts,
) -> (SaleOutcome, CapitalGainsRule) {
    let opt = &inputs.optional;
    let sale_price = state.home_value;
    let closing_costs = sale_price * opt.sale_closing_cost_rate;
    let (capital_gains_tax, rule) = capital_gains_tax(
        sale_price,
        derived.years_resided,
        opt.cost_basis,
        opt.capital_gains_rate,
    );
    let loan_payoff = state.loan_balance;
    let net_proceeds = sale_price - closing_costs - capital_gains_tax - loan_payoff;

    state.home_value = 0.0;
    state.loan_balance = 0.0;
    state.amortization_payment = 0.0;
    state.cash_flow_payment = 0.0;
    state.route_cash_flow(net_proceeds);

    debug!(
        sale_price,
        closing_costs, capital_gains_tax, net_proceeds, "applied sell transaction"
    );

    (
        SaleOutcome {
            sale_price,
            closing_costs,
            capital_gains_tax,
            loan_payoff,
            net_proceeds,
        },
        rule,
    )
}

fn refinance(state: &mut ScenarioState, terms: &RefinanceTerms) -> RefinanceMeta {
    let paydown = terms
        .cash_in
        .min(state.invest.max(0.0))
        .min(state.loan_balance);
    state.invest -= paydown;
    state.loan_balance -= paydown;

    let closing_costs = state.loan_balance * terms.closing_cost_rate;
    state.invest -= closing_costs;
    if state.invest < 0.0 {
        state.drag += state.invest;
        state.invest = 0.0;
    }

    let payment = amortizing_payment(state.loan_balance, terms.annual_rate, terms.term_years * 12);
    state.loan_rate = terms.annual_rate;
    state.amortization_payment = payment;
    state.cash_flow_payment = payment;

    debug!(paydown, closing_costs, payment, "refinanced");

    RefinanceMeta {
        payment,
        paydown,
        closing_costs,
        upfront_cost: paydown + closing_costs,
        breakeven_months: None,
    }
}

fn refinance_breakeven(years: &[YearRow], upfront_cost: f64) -> Option<f64> {
    let first_year = years.get(1)?;
    let with_refi = first_year.get(Scenario::RentRefi)?.rental_income;
    let without_refi = first_year.get(Scenario::Rent)?.rental_income;
    let monthly_benefit = (with_refi - without_refi) / 12.0;
    (monthly_benefit > 0.0).then(|| upfront_cost / monthly_benefit)
}

/// One month: inflate costs, grow investments and homes, then route each rental's cash flow.
fn advance_month(
    sell: &mut ScenarioState,
    holders: &mut [ScenarioState],
    costs: &mut MonthlyCosts,
    rates: &MonthlyRates,
    credit_avoided_cash_flow: bool,
) {
    costs.inflate(rates.inflation);
    sell.invest *= 1.0 + rates.market;

    let mut avoided = 0.0;
    for state in holders.iter_mut() {
        state.invest *= 1.0 + rates.market;
        state.home_value *= 1.0 + rates.appreciation;
        let net = state.rental_month(costs, rates);
        if state.scenario == Scenario::Rent && net < 0.0 {
            avoided -= net;
        }
    }
    if credit_avoided_cash_flow {
        sell.invest += avoided;
    }
}

/// Validates `inputs` against `today` and runs the projection.
pub fn simulate(
    inputs: &Inputs,
    config: &SimulationConfig,
    today: YearMonth,
) -> Result<SimulationResult, ValidationErrors> {
    let derived = validate(inputs, config, today)?;
    Ok(run_simulation(inputs, &derived, config))
}

/// Steps every scenario month by month over the horizon. Expects validated input.
pub fn run_simulation(
    inputs: &Inputs,
    derived: &DerivedFacts,
    config: &SimulationConfig,
) -> SimulationResult {
    let req = &inputs.required;
    let opt = &inputs.optional;

    let rates = MonthlyRates {
        market: annual_to_monthly_rate(opt.market_return),
        appreciation: annual_to_monthly_rate(opt.home_appreciation),
        inflation: annual_to_monthly_rate(opt.inflation),
        operating_cost_fraction: opt.rental_costs.total(),
        rental_tax_rate: opt.rental_tax_rate,
    };
    let withdrawal_rate = config.report_income_potential.then_some(opt.withdrawal_rate);

    let computed_payment =
        amortizing_payment(req.loan_balance, req.loan_rate, derived.months_remaining);
    let cash_flow_payment = opt.override_payment.unwrap_or(computed_payment);

    // Refinance cash is on hand in every scenario so the starting positions stay comparable.
    let starting_cash = if config.include_refinance {
        opt.refinance.cash_in
    } else {
        0.0
    };
    let baseline_net_worth = req.home_value - req.loan_balance + starting_cash;

    let open_state = |scenario| ScenarioState {
        scenario,
        home_value: req.home_value,
        loan_balance: req.loan_balance,
        loan_rate: req.loan_rate,
        amortization_payment: computed_payment,
        cash_flow_payment,
        invest: starting_cash,
        drag: 0.0,
        rental_income_ytd: 0.0,
    };
    let mut sell = open_state(Scenario::Sell);
    let mut holders = vec![open_state(Scenario::Rent)];
    if config.include_refinance {
        holders.push(open_state(Scenario::RentRefi));
    }

    debug!(
        horizon_years = config.horizon_years,
        scenarios = holders.len() + 1,
        baseline_net_worth,
        computed_payment,
        cash_flow_payment,
        "starting simulation"
    );

    let mut years = Vec::with_capacity(config.horizon_years as usize + 1);
    years.push(YearRow {
        year: 0,
        scenarios: std::iter::once(&sell)
            .chain(holders.iter())
            .map(|s| s.snapshot(withdrawal_rate))
            .collect(),
    });

    let (sale, capital_gains_rule) = sell_home(&mut sell, inputs, derived);
    let sell_transaction_hit = baseline_net_worth - sell.net_worth();
    let refinance_meta = holders
        .iter_mut()
        .find(|s| s.scenario == Scenario::RentRefi)
        .map(|s| refinance(s, &opt.refinance));

    let mut costs = MonthlyCosts {
        rent: req.monthly_rent,
        property_tax: req.property_tax_monthly,
        insurance: req.insurance_monthly,
    };

    for month in 1..=config.horizon_years * 12 {
        advance_month(
            &mut sell,
            &mut holders,
            &mut costs,
            &rates,
            config.credit_avoided_cash_flow,
        );

        if month % 12 == 0 {
            years.push(YearRow {
                year: month / 12,
                scenarios: std::iter::once(&mut sell)
                    .chain(holders.iter_mut())
                    .map(|s| s.close_year(withdrawal_rate))
                    .collect(),
            });
        }
    }

    let refinance = refinance_meta.map(|mut meta| {
        meta.breakeven_months = refinance_breakeven(&years, meta.upfront_cost);
        meta
    });

    debug!(years = years.len(), "simulation finished");

    SimulationResult {
        years,
        meta: SimulationMeta {
            horizon_years: config.horizon_years,
            months_remaining: derived.months_remaining,
            years_resided: derived.years_resided,
            computed_payment,
            cash_flow_payment,
            payment_overridden: opt.override_payment.is_some(),
            baseline_net_worth,
            sale,
            sell_transaction_hit,
            capital_gains_rule,
            tax_line: capital_gains_rule.explanation(),
            refinance,
        },
    }
}

/// Scenarios ordered best-first by `metric`; equal values keep Sell, Rent, Rent+Refi order.
///
/// `None` when the row does not carry the metric.
pub fn rank_scenarios(row: &YearRow, metric: RankMetric) -> Option<Vec<(Scenario, f64)>> {
    let mut ranked = row
        .scenarios
        .iter()
        .map(|s| {
            let value = match metric {
                RankMetric::NetWorth => Some(s.net_worth),
                RankMetric::IncomePotential => s.income_potential.map(|i| i.total),
            };
            value.map(|v| (s.scenario, v))
        })
        .collect::<Option<Vec<_>>>()?;
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    Some(ranked)
}

impl SimulationResult {
    pub fn final_year(&self) -> Option<&YearRow> {
        self.years.last()
    }

    pub fn winner_at(&self, year: u32, metric: RankMetric) -> Option<Scenario> {
        let row = self.years.get(year as usize)?;
        rank_scenarios(row, metric)?
            .first()
            .map(|(scenario, _)| *scenario)
    }
}
