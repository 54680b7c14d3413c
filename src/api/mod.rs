use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Local;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::core::{
    Inputs, OptionalAssumptions, RankMetric, RefinanceTerms, RentalCosts, RequiredInputs, Scenario,
    ScenarioYear, SimulationConfig, SimulationMeta, SimulationResult, YearMonth, YearRow,
    pct_to_decimal, rank_scenarios, simulate,
};

/// Years shown in the CLI summary table, besides the horizon itself.
const SUMMARY_YEARS: [u32; 4] = [0, 1, 5, 10];

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sell-vs-rent",
    about = "Project selling a home against keeping it as a rental (optionally refinanced)"
)]
struct Cli {
    #[arg(long, help = "Current home value")]
    home_value: f64,
    #[arg(long, help = "Remaining loan balance")]
    loan_balance: f64,
    #[arg(long, help = "Current loan interest rate in percent, e.g. 6.5")]
    current_rate: f64,
    #[arg(long, help = "Estimated monthly market rent")]
    monthly_rent: f64,
    #[arg(long, help = "Monthly property taxes")]
    taxes_monthly: f64,
    #[arg(long, help = "Monthly homeowner's insurance")]
    insurance_monthly: f64,
    #[arg(long, help = "Month moved in, YYYY-MM")]
    moved_in: YearMonth,
    #[arg(
        long,
        help = "Month moved out (or planned), YYYY-MM; omit while still living there"
    )]
    moved_out: Option<YearMonth>,
    #[arg(long, help = "Month the loan is paid off, YYYY-MM")]
    loan_end: YearMonth,
    #[arg(
        long,
        help = "Month to project from, YYYY-MM; defaults to the current month"
    )]
    today: Option<YearMonth>,
    #[arg(long, default_value_t = 7.0, help = "Annual market return in percent")]
    market_return: f64,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Annual home appreciation in percent"
    )]
    home_appreciation: f64,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Annual inflation in percent; grows rent, taxes and insurance"
    )]
    inflation: f64,
    #[arg(
        long,
        default_value_t = 6.0,
        help = "Sale closing costs in percent of price"
    )]
    sale_closing_pct: f64,
    #[arg(long, default_value_t = 5.0, help = "Vacancy in percent of rent")]
    vacancy_pct: f64,
    #[arg(long, default_value_t = 5.0, help = "Maintenance in percent of rent")]
    maintenance_pct: f64,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Capital expenditure in percent of rent"
    )]
    capex_pct: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Property management in percent of rent"
    )]
    management_pct: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Tax rate in percent on positive rental cash flow"
    )]
    rental_tax_rate: f64,
    #[arg(
        long,
        default_value_t = 15.0,
        help = "Capital gains tax rate in percent, used when resided under 2 years"
    )]
    capital_gains_rate: f64,
    #[arg(long, help = "Purchase cost basis; omit to assume no taxable gain")]
    cost_basis: Option<f64>,
    #[arg(
        long,
        help = "Monthly P&I used for cash flow instead of the computed payment"
    )]
    override_payment: Option<f64>,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Withdrawal rate in percent for income potential"
    )]
    withdrawal_rate: f64,
    #[arg(long, help = "Also model renting with a refinanced loan")]
    refinance: bool,
    #[arg(
        long,
        default_value_t = 5.5,
        help = "Refinance interest rate in percent"
    )]
    refi_rate: f64,
    #[arg(long, default_value_t = 30, help = "Refinance term in years")]
    refi_term_years: u32,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Refinance closing costs in percent of the new balance"
    )]
    refi_closing_pct: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Cash paid toward principal at refinance; counted as on hand in every scenario"
    )]
    refi_cash_in: f64,
    #[arg(
        long,
        help = "Credit the rental's negative cash flow to the sell scenario's investments"
    )]
    credit_avoided_cash_flow: bool,
    #[arg(long, help = "Report withdrawal-based income potential per scenario")]
    income_potential: bool,
    #[arg(
        long,
        default_value_t = 30,
        help = "Projection horizon in years (max 50)"
    )]
    horizon_years: u32,
    #[arg(long, help = "Print the yearly series as CSV instead of the summary")]
    csv: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    home_value: Option<f64>,
    loan_balance: Option<f64>,
    current_rate: Option<f64>,
    monthly_rent: Option<f64>,
    taxes_monthly: Option<f64>,
    insurance_monthly: Option<f64>,
    moved_in: Option<String>,
    moved_out: Option<String>,
    loan_end: Option<String>,
    today: Option<String>,

    market_return: Option<f64>,
    home_appreciation: Option<f64>,
    inflation: Option<f64>,
    sale_closing_pct: Option<f64>,
    vacancy_pct: Option<f64>,
    maintenance_pct: Option<f64>,
    capex_pct: Option<f64>,
    management_pct: Option<f64>,
    rental_tax_rate: Option<f64>,
    capital_gains_rate: Option<f64>,
    cost_basis: Option<f64>,
    override_payment: Option<f64>,
    withdrawal_rate: Option<f64>,

    refinance: Option<bool>,
    refi_rate: Option<f64>,
    refi_term_years: Option<u32>,
    refi_closing_pct: Option<f64>,
    refi_cash_in: Option<f64>,

    credit_avoided_cash_flow: Option<bool>,
    income_potential: Option<bool>,
    horizon_years: Option<u32>,
}

#[derive(Debug)]
struct ApiRequest {
    inputs: Inputs,
    config: SimulationConfig,
    today: YearMonth,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    today: String,
    net_worth_winner: Option<Scenario>,
    income_winner: Option<Scenario>,
    years: Vec<YearRow>,
    meta: SimulationMeta,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
}

#[derive(Debug)]
struct ApiFailure {
    status: StatusCode,
    error: String,
    details: Vec<String>,
}

/// Installs the stderr log subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn current_month() -> YearMonth {
    Local::now().date_naive().into()
}

fn build_request(cli: Cli) -> ApiRequest {
    let inputs = Inputs {
        required: RequiredInputs {
            home_value: cli.home_value,
            loan_balance: cli.loan_balance,
            loan_rate: pct_to_decimal(cli.current_rate),
            monthly_rent: cli.monthly_rent,
            property_tax_monthly: cli.taxes_monthly,
            insurance_monthly: cli.insurance_monthly,
            moved_in: cli.moved_in,
            moved_out: cli.moved_out,
            loan_end: cli.loan_end,
        },
        optional: OptionalAssumptions {
            market_return: pct_to_decimal(cli.market_return),
            home_appreciation: pct_to_decimal(cli.home_appreciation),
            inflation: pct_to_decimal(cli.inflation),
            sale_closing_cost_rate: pct_to_decimal(cli.sale_closing_pct),
            rental_costs: RentalCosts {
                vacancy: pct_to_decimal(cli.vacancy_pct),
                maintenance: pct_to_decimal(cli.maintenance_pct),
                capex: pct_to_decimal(cli.capex_pct),
                management: pct_to_decimal(cli.management_pct),
            },
            rental_tax_rate: pct_to_decimal(cli.rental_tax_rate),
            capital_gains_rate: pct_to_decimal(cli.capital_gains_rate),
            cost_basis: cli.cost_basis,
            override_payment: cli.override_payment,
            withdrawal_rate: pct_to_decimal(cli.withdrawal_rate),
            refinance: RefinanceTerms {
                annual_rate: pct_to_decimal(cli.refi_rate),
                term_years: cli.refi_term_years,
                closing_cost_rate: pct_to_decimal(cli.refi_closing_pct),
                cash_in: cli.refi_cash_in,
            },
        },
    };
    let config = SimulationConfig {
        horizon_years: cli.horizon_years,
        include_refinance: cli.refinance,
        credit_avoided_cash_flow: cli.credit_avoided_cash_flow,
        report_income_potential: cli.income_potential,
    };

    ApiRequest {
        inputs,
        config,
        today: cli.today.unwrap_or_else(current_month),
    }
}

/// Parses CLI arguments, runs the projection and prints the summary or CSV to stdout.
pub fn run_cli<I, T>(args: I) -> Result<(), String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    let as_csv = cli.csv;
    let request = build_request(cli);
    let result = simulate(&request.inputs, &request.config, request.today)
        .map_err(|e| format!("Please fix:\n- {}", e.messages().join("\n- ")))?;

    if as_csv {
        print!("{}", build_csv(&result));
    } else {
        print!("{}", render_summary(&result, &request.inputs.optional));
    }
    Ok(())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route(
            "/api/simulate.csv",
            get(simulate_csv_get_handler).post(simulate_csv_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "sell-vs-rent HTTP API listening");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found", Vec::new())
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_json(payload)
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_json(payload)
}

async fn simulate_csv_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_csv(payload)
}

async fn simulate_csv_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_csv(payload)
}

fn simulate_json(payload: SimulatePayload) -> Response {
    match run_payload(payload) {
        Ok((request, result)) => {
            json_response(StatusCode::OK, build_simulate_response(&request, result))
        }
        Err(failure) => failure.into_response(),
    }
}

fn simulate_csv(payload: SimulatePayload) -> Response {
    match run_payload(payload) {
        Ok((_, result)) => with_cache_control((
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            build_csv(&result),
        )),
        Err(failure) => failure.into_response(),
    }
}

fn run_payload(payload: SimulatePayload) -> Result<(ApiRequest, SimulationResult), ApiFailure> {
    let request = api_request_from_payload(payload).map_err(|msg| ApiFailure {
        status: StatusCode::BAD_REQUEST,
        error: msg,
        details: Vec::new(),
    })?;

    info!(
        today = %request.today,
        horizon_years = request.config.horizon_years,
        refinance = request.config.include_refinance,
        "simulation request"
    );

    match simulate(&request.inputs, &request.config, request.today) {
        Ok(result) => Ok((request, result)),
        Err(errors) => {
            warn!(count = errors.0.len(), "rejected simulation inputs");
            Err(ApiFailure {
                status: StatusCode::BAD_REQUEST,
                error: "Invalid simulation inputs".to_string(),
                details: errors.messages(),
            })
        }
    }
}

impl ApiFailure {
    fn into_response(self) -> Response {
        error_response(self.status, &self.error, self.details)
    }
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str, details: Vec<String>) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
            details,
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn parse_month(field: &str, value: &str) -> Result<YearMonth, String> {
    value.parse().map_err(|e| format!("{field}: {e}"))
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<ApiRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.home_value {
        cli.home_value = v;
    }
    if let Some(v) = payload.loan_balance {
        cli.loan_balance = v;
    }
    if let Some(v) = payload.current_rate {
        cli.current_rate = v;
    }
    if let Some(v) = payload.monthly_rent {
        cli.monthly_rent = v;
    }
    if let Some(v) = payload.taxes_monthly {
        cli.taxes_monthly = v;
    }
    if let Some(v) = payload.insurance_monthly {
        cli.insurance_monthly = v;
    }
    if let Some(v) = payload.moved_in {
        cli.moved_in = parse_month("movedIn", &v)?;
    }
    if let Some(v) = payload.moved_out {
        cli.moved_out = if v.trim().is_empty() {
            None
        } else {
            Some(parse_month("movedOut", &v)?)
        };
    }
    if let Some(v) = payload.loan_end {
        cli.loan_end = parse_month("loanEnd", &v)?;
    }
    if let Some(v) = payload.today {
        cli.today = Some(parse_month("today", &v)?);
    }

    if let Some(v) = payload.market_return {
        cli.market_return = v;
    }
    if let Some(v) = payload.home_appreciation {
        cli.home_appreciation = v;
    }
    if let Some(v) = payload.inflation {
        cli.inflation = v;
    }
    if let Some(v) = payload.sale_closing_pct {
        cli.sale_closing_pct = v;
    }
    if let Some(v) = payload.vacancy_pct {
        cli.vacancy_pct = v;
    }
    if let Some(v) = payload.maintenance_pct {
        cli.maintenance_pct = v;
    }
    if let Some(v) = payload.capex_pct {
        cli.capex_pct = v;
    }
    if let Some(v) = payload.management_pct {
        cli.management_pct = v;
    }
    if let Some(v) = payload.rental_tax_rate {
        cli.rental_tax_rate = v;
    }
    if let Some(v) = payload.capital_gains_rate {
        cli.capital_gains_rate = v;
    }
    if let Some(v) = payload.cost_basis {
        cli.cost_basis = Some(v);
    }
    if let Some(v) = payload.override_payment {
        cli.override_payment = Some(v);
    }
    if let Some(v) = payload.withdrawal_rate {
        cli.withdrawal_rate = v;
    }

    if let Some(v) = payload.refinance {
        cli.refinance = v;
    }
    if let Some(v) = payload.refi_rate {
        cli.refi_rate = v;
    }
    if let Some(v) = payload.refi_term_years {
        cli.refi_term_years = v;
    }
    if let Some(v) = payload.refi_closing_pct {
        cli.refi_closing_pct = v;
    }
    if let Some(v) = payload.refi_cash_in {
        cli.refi_cash_in = v;
    }

    if let Some(v) = payload.credit_avoided_cash_flow {
        cli.credit_avoided_cash_flow = v;
    }
    if let Some(v) = payload.income_potential {
        cli.income_potential = v;
    }
    if let Some(v) = payload.horizon_years {
        cli.horizon_years = v;
    }

    Ok(build_request(cli))
}

fn default_cli_for_api() -> Cli {
    Cli {
        home_value: 600_000.0,
        loan_balance: 400_000.0,
        current_rate: 6.0,
        monthly_rent: 3_000.0,
        taxes_monthly: 500.0,
        insurance_monthly: 150.0,
        moved_in: YearMonth::new(2021, 1),
        moved_out: None,
        loan_end: YearMonth::new(2056, 1),
        today: None,
        market_return: 7.0,
        home_appreciation: 3.0,
        inflation: 3.0,
        sale_closing_pct: 6.0,
        vacancy_pct: 5.0,
        maintenance_pct: 5.0,
        capex_pct: 5.0,
        management_pct: 0.0,
        rental_tax_rate: 0.0,
        capital_gains_rate: 15.0,
        cost_basis: None,
        override_payment: None,
        withdrawal_rate: 4.0,
        refinance: false,
        refi_rate: 5.5,
        refi_term_years: 30,
        refi_closing_pct: 2.0,
        refi_cash_in: 0.0,
        credit_avoided_cash_flow: false,
        income_potential: false,
        horizon_years: 30,
        csv: false,
    }
}

fn build_simulate_response(request: &ApiRequest, result: SimulationResult) -> SimulateResponse {
    let horizon = result.meta.horizon_years;
    SimulateResponse {
        today: request.today.to_string(),
        net_worth_winner: result.winner_at(horizon, RankMetric::NetWorth),
        income_winner: result.winner_at(horizon, RankMetric::IncomePotential),
        years: result.years,
        meta: result.meta,
    }
}

fn csv_cell(value: f64) -> String {
    format!("{value:.2}")
}

/// One row per year; income columns only when income potential was reported.
pub fn build_csv(result: &SimulationResult) -> String {
    let Some(first) = result.years.first() else {
        return String::new();
    };
    let with_income = first.scenarios.iter().any(|s| s.income_potential.is_some());

    let mut header = vec!["Year".to_string()];
    for s in &first.scenarios {
        let label = s.scenario.label();
        header.push(format!("{label}_NetWorth"));
        header.push(format!("{label}_Stocks"));
        header.push(format!("{label}_HomeEquity"));
        if with_income {
            header.push(format!("{label}_RentalIncome"));
            header.push(format!("{label}_IncomePotential"));
        }
    }

    let mut lines = vec![header.join(",")];
    for row in &result.years {
        let mut cells = vec![row.year.to_string()];
        for s in &row.scenarios {
            cells.push(csv_cell(s.net_worth));
            cells.push(csv_cell(s.stocks));
            cells.push(csv_cell(s.home_equity));
            if with_income {
                cells.push(csv_cell(s.rental_income));
                cells.push(csv_cell(s.income_potential.map_or(0.0, |i| i.total)));
            }
        }
        lines.push(cells.join(","));
    }

    let mut csv = lines.join("\n");
    csv.push('\n');
    csv
}

fn round_to_thousand(n: f64) -> f64 {
    (n / 1000.0).round() * 1000.0
}

/// `$123K` / `$1.2M` style, to the nearest thousand.
fn format_compact_money(n: f64) -> String {
    let x = round_to_thousand(n);
    if !x.is_finite() {
        return "n/a".to_string();
    }
    let sign = if x < 0.0 { "-" } else { "" };
    let ax = x.abs();

    if ax >= 1_000_000.0 {
        let m = ax / 1_000_000.0;
        let text = if m >= 10.0 {
            format!("{m:.0}")
        } else {
            format!("{m:.1}")
        };
        return format!("{sign}${text}M");
    }
    format!("{sign}${:.0}K", ax / 1000.0)
}

fn format_money(n: f64) -> String {
    if !n.is_finite() {
        return "n/a".to_string();
    }
    let rounded = n.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if rounded < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}")
}

fn format_breakdown(year: &ScenarioYear) -> String {
    let stocks = round_to_thousand(year.stocks);
    let equity = round_to_thousand(year.home_equity);
    format!(
        "{} ({} stocks, {} home equity)",
        format_compact_money(stocks + equity),
        format_compact_money(stocks),
        format_compact_money(equity)
    )
}

fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

fn assumptions_line(opt: &OptionalAssumptions) -> String {
    let costs = &opt.rental_costs;
    format!(
        "Key assumptions: market return {}, home appreciation {}, inflation/rent growth {}; \
         rental costs: vacancy {}, maintenance {}, capex {}, management {}; rental tax rate {}.",
        percent(opt.market_return),
        percent(opt.home_appreciation),
        percent(opt.inflation),
        percent(costs.vacancy),
        percent(costs.maintenance),
        percent(costs.capex),
        percent(costs.management),
        percent(opt.rental_tax_rate)
    )
}

fn render_summary(result: &SimulationResult, assumptions: &OptionalAssumptions) -> String {
    let meta = &result.meta;
    let horizon = meta.horizon_years;
    let mut out = String::new();

    if let Some(ranked) = result
        .years
        .get(horizon as usize)
        .and_then(|row| rank_scenarios(row, RankMetric::NetWorth))
    {
        if let (Some(top), Some(bottom)) = (ranked.first(), ranked.last()) {
            out.push_str(&format!(
                "Net worth: {} results in your highest net worth in {horizon} years, while {} results in your lowest.\n",
                top.0.label(),
                bottom.0.label()
            ));
        }
    }
    if let Some(winner) = result.winner_at(horizon, RankMetric::IncomePotential) {
        out.push_str(&format!(
            "Income potential: {} gives your highest income potential in {horizon} years.\n",
            winner.label()
        ));
    }
    out.push_str(&format!(
        "SELL: your net worth takes a ~{} hit due to total transaction costs.\n",
        format_compact_money(meta.sell_transaction_hit)
    ));
    out.push_str(&assumptions_line(assumptions));
    out.push('\n');
    out.push_str(&meta.tax_line);
    out.push('\n');
    if meta.payment_overridden {
        out.push_str(&format!(
            "Current P&I for cash flow: overridden to {} (payoff still uses computed payment {}).\n",
            format_money(meta.cash_flow_payment),
            format_money(meta.computed_payment)
        ));
    } else {
        out.push_str(&format!(
            "Current P&I: computed as {} from balance, rate and loan end date.\n",
            format_money(meta.computed_payment)
        ));
    }
    if let Some(refi) = &meta.refinance {
        let breakeven = refi
            .breakeven_months
            .map_or("not applicable".to_string(), |m| format!("{m:.0} months"));
        out.push_str(&format!(
            "Refinance: new P&I {}, upfront cost {}, breakeven {breakeven}.\n",
            format_money(refi.payment),
            format_money(refi.upfront_cost)
        ));
    }

    out.push('\n');
    let mut shown: Vec<u32> = SUMMARY_YEARS
        .iter()
        .copied()
        .filter(|y| *y < horizon)
        .collect();
    shown.push(horizon);
    for y in shown {
        let Some(row) = result.years.get(y as usize) else {
            continue;
        };
        let cells: Vec<String> = row
            .scenarios
            .iter()
            .map(|s| format!("{}: {}", s.scenario.label(), format_breakdown(s)))
            .collect();
        out.push_str(&format!("Year {y:>2} | {}\n", cells.join(" | ")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CapitalGainsRule;
    use clap::CommandFactory;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_cli() -> Cli {
        let mut cli = default_cli_for_api();
        cli.today = Some(YearMonth::new(2026, 1));
        cli
    }

    fn run_cli_request(cli: Cli) -> SimulationResult {
        let request = build_request(cli);
        simulate(&request.inputs, &request.config, request.today).expect("valid inputs")
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_parses_months_and_flags() {
        let cli = Cli::try_parse_from([
            "sell-vs-rent",
            "--home-value",
            "500000",
            "--loan-balance",
            "300000",
            "--current-rate",
            "4.5",
            "--monthly-rent",
            "2500",
            "--taxes-monthly",
            "400",
            "--insurance-monthly",
            "100",
            "--moved-in",
            "2019-06",
            "--loan-end",
            "2049-06",
            "--refinance",
            "--refi-cash-in",
            "20000",
            "--csv",
        ])
        .expect("valid args");

        assert_eq!(cli.moved_in, YearMonth::new(2019, 6));
        assert_eq!(cli.moved_out, None);
        assert!(cli.refinance && cli.csv);
        assert!(!cli.income_potential);
        assert_approx(cli.market_return, 7.0);

        let request = build_request(cli);
        assert_approx(request.inputs.required.loan_rate, 0.045);
        assert_approx(request.inputs.optional.refinance.cash_in, 20_000.0);
        assert!(request.config.include_refinance);
    }

    #[test]
    fn cli_rejects_malformed_month() {
        let err = Cli::try_parse_from([
            "sell-vs-rent",
            "--home-value",
            "1",
            "--loan-balance",
            "0",
            "--current-rate",
            "1",
            "--monthly-rent",
            "0",
            "--taxes-monthly",
            "0",
            "--insurance-monthly",
            "0",
            "--moved-in",
            "June 2019",
            "--loan-end",
            "2049-06",
        ])
        .expect_err("must reject month");
        assert!(err.to_string().contains("YYYY-MM"));
    }

    #[test]
    fn build_request_converts_percentages_to_fractions() {
        let mut cli = sample_cli();
        cli.vacancy_pct = 8.0;
        cli.management_pct = 10.0;
        cli.capital_gains_rate = 20.0;
        cli.refi_closing_pct = 1.5;

        let request = build_request(cli);
        let opt = &request.inputs.optional;
        assert_approx(request.inputs.required.loan_rate, 0.06);
        assert_approx(opt.market_return, 0.07);
        assert_approx(opt.rental_costs.vacancy, 0.08);
        assert_approx(opt.rental_costs.management, 0.10);
        assert_approx(opt.capital_gains_rate, 0.20);
        assert_approx(opt.refinance.closing_cost_rate, 0.015);
        assert_approx(opt.withdrawal_rate, 0.04);
        assert_eq!(request.today, YearMonth::new(2026, 1));
    }

    #[test]
    fn api_request_from_json_parses_web_keys() {
        let json = r#"{
          "homeValue": 750000,
          "loanBalance": 500000,
          "currentRate": 3.25,
          "monthlyRent": 3600,
          "taxesMonthly": 700,
          "insuranceMonthly": 180,
          "movedIn": "2025-03",
          "movedOut": "2026-02",
          "loanEnd": "2051-03",
          "today": "2026-04",
          "costBasis": 690000,
          "overridePayment": 2100,
          "refinance": true,
          "refiRate": 4.75,
          "refiTermYears": 15,
          "creditAvoidedCashFlow": true,
          "incomePotential": true,
          "horizonYears": 50
        }"#;
        let request = api_request_from_json(json).expect("json should parse");
        let req = &request.inputs.required;
        let opt = &request.inputs.optional;

        assert_approx(req.home_value, 750_000.0);
        assert_approx(req.loan_rate, 0.0325);
        assert_eq!(req.moved_in, YearMonth::new(2025, 3));
        assert_eq!(req.moved_out, Some(YearMonth::new(2026, 2)));
        assert_eq!(req.loan_end, YearMonth::new(2051, 3));
        assert_eq!(request.today, YearMonth::new(2026, 4));
        assert_eq!(opt.cost_basis, Some(690_000.0));
        assert_eq!(opt.override_payment, Some(2_100.0));
        assert_approx(opt.refinance.annual_rate, 0.0475);
        assert_eq!(opt.refinance.term_years, 15);
        assert_eq!(
            request.config,
            SimulationConfig {
                horizon_years: 50,
                include_refinance: true,
                credit_avoided_cash_flow: true,
                report_income_potential: true,
            }
        );
    }

    #[test]
    fn api_request_treats_blank_move_out_as_still_resident() {
        let request = api_request_from_json(r#"{"movedOut": "  "}"#).expect("json should parse");
        assert_eq!(request.inputs.required.moved_out, None);
    }

    #[test]
    fn api_request_rejects_malformed_month_with_field_name() {
        let err = api_request_from_json(r#"{"loanEnd": "2051/03"}"#).expect_err("must reject");
        assert!(err.starts_with("loanEnd:"), "got {err}");
    }

    #[test]
    fn run_payload_reports_every_validation_error() {
        let payload = SimulatePayload {
            home_value: Some(0.0),
            monthly_rent: Some(-1.0),
            loan_end: Some("2020-01".to_string()),
            today: Some("2026-01".to_string()),
            ..SimulatePayload::default()
        };
        let failure = run_payload(payload).expect_err("must reject");
        assert_eq!(failure.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            failure.details,
            vec![
                "Home value must be > 0".to_string(),
                "Estimated monthly rent must be >= 0".to_string(),
                "Loan end date must be in the future (at least 1 month from now)".to_string(),
            ]
        );
    }

    #[test]
    fn simulate_response_serialization_contains_expected_fields() {
        let payload = SimulatePayload {
            today: Some("2026-01".to_string()),
            refinance: Some(true),
            refi_cash_in: Some(25_000.0),
            income_potential: Some(true),
            horizon_years: Some(10),
            ..SimulatePayload::default()
        };
        let (request, result) = run_payload(payload).expect("valid payload");
        let response = build_simulate_response(&request, result);
        assert_eq!(response.years.len(), 11);

        let json = serde_json::to_string(&response).expect("response should serialize");
        assert!(json.contains("\"today\":\"2026-01\""));
        assert!(json.contains("\"netWorthWinner\""));
        assert!(json.contains("\"incomeWinner\""));
        assert!(json.contains("\"scenario\":\"rent-refi\""));
        assert!(json.contains("\"incomePotential\""));
        assert!(json.contains("\"breakevenMonths\""));
        assert!(json.contains("\"taxLine\""));
        assert!(json.contains("\"kind\":\"residencyExclusion\""));
    }

    #[test]
    fn csv_has_one_row_per_year_and_scenario_columns() {
        let result = run_cli_request(sample_cli());
        let csv = build_csv(&result);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 32);
        assert_eq!(
            lines[0],
            "Year,SELL_NetWorth,SELL_Stocks,SELL_HomeEquity,RENT_NetWorth,RENT_Stocks,RENT_HomeEquity"
        );
        assert_eq!(
            lines[1],
            "0,200000.00,0.00,200000.00,200000.00,0.00,200000.00"
        );
        assert!(lines[31].starts_with("30,"));
        assert!(lines.iter().skip(1).all(|l| l.split(',').count() == 7));
    }

    #[test]
    fn csv_adds_income_columns_when_reported() {
        let mut cli = sample_cli();
        cli.refinance = true;
        cli.income_potential = true;
        cli.horizon_years = 5;
        let csv = build_csv(&run_cli_request(cli));
        let header = csv.lines().next().expect("header");

        assert_eq!(header.split(',').count(), 1 + 3 * 5);
        assert!(header.contains("RENT_REFI_IncomePotential"));
        assert!(header.contains("SELL_RentalIncome"));
        assert_eq!(csv.lines().count(), 7);
    }

    #[test]
    fn compact_money_rounds_to_thousands() {
        assert_eq!(format_compact_money(36_000.0), "$36K");
        assert_eq!(format_compact_money(35_499.0), "$35K");
        assert_eq!(format_compact_money(-12_600.0), "-$13K");
        assert_eq!(format_compact_money(1_234_567.0), "$1.2M");
        assert_eq!(format_compact_money(12_345_678.0), "$12M");
        assert_eq!(format_compact_money(400.0), "$0K");
        assert_eq!(format_compact_money(f64::NAN), "n/a");
    }

    #[test]
    fn money_is_grouped_by_thousands() {
        assert_eq!(format_money(2_398.2), "$2,398");
        assert_eq!(format_money(1_234_567.5), "$1,234,568");
        assert_eq!(format_money(999.0), "$999");
        assert_eq!(format_money(-45_000.0), "-$45,000");
    }

    #[test]
    fn summary_names_winner_hit_and_tax_rule() {
        let mut cli = sample_cli();
        cli.refinance = true;
        cli.override_payment = Some(1_800.0);
        cli.management_pct = 8.0;
        cli.rental_tax_rate = 22.5;
        let assumptions = build_request(cli.clone()).inputs.optional;
        let result = run_cli_request(cli);
        let summary = render_summary(&result, &assumptions);

        assert!(summary.starts_with("Net worth: "));
        assert!(summary.contains("~$36K hit"));
        assert!(summary.contains(&CapitalGainsRule::ResidencyExclusion.explanation()));
        assert!(summary.contains("overridden to $1,800"));
        assert!(summary.contains("Refinance: new P&I"));
        let expected_assumptions = "Key assumptions: market return 7.0%, home appreciation 3.0%, \
            inflation/rent growth 3.0%; rental costs: vacancy 5.0%, maintenance 5.0%, \
            capex 5.0%, management 8.0%; rental tax rate 22.5%.";
        assert!(summary.contains(expected_assumptions));
        for y in [0, 1, 5, 10, 30] {
            assert!(
                summary.contains(&format!("Year {y:>2} | SELL: ")),
                "year {y}"
            );
        }
    }
}
