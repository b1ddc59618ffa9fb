/// Static ticker-to-sector lookup used to enrich trade memories and to
/// group performance by sector. Unknown tickers fall back to "Unknown".
const SECTOR_MAP: &[(&str, &str)] = &[
    ("AAPL", "Technology"), ("MSFT", "Technology"), ("GOOGL", "Technology"),
    ("GOOG", "Technology"), ("META", "Technology"), ("NVDA", "Technology"),
    ("AMD", "Technology"), ("INTC", "Technology"), ("CRM", "Technology"),
    ("ORCL", "Technology"), ("ADBE", "Technology"), ("CSCO", "Technology"),
    ("IBM", "Technology"), ("QCOM", "Technology"), ("TXN", "Technology"),
    ("AVGO", "Technology"), ("NOW", "Technology"), ("SNOW", "Technology"),
    ("PLTR", "Technology"), ("NET", "Technology"),
    ("AMZN", "Consumer Discretionary"), ("TSLA", "Consumer Discretionary"),
    ("HD", "Consumer Discretionary"), ("NKE", "Consumer Discretionary"),
    ("MCD", "Consumer Discretionary"), ("SBUX", "Consumer Discretionary"),
    ("LOW", "Consumer Discretionary"), ("TJX", "Consumer Discretionary"),
    ("BKNG", "Consumer Discretionary"), ("CMG", "Consumer Discretionary"),
    ("PG", "Consumer Staples"), ("KO", "Consumer Staples"), ("PEP", "Consumer Staples"),
    ("WMT", "Consumer Staples"), ("COST", "Consumer Staples"), ("CL", "Consumer Staples"),
    ("JPM", "Financials"), ("BAC", "Financials"), ("WFC", "Financials"),
    ("GS", "Financials"), ("MS", "Financials"), ("C", "Financials"),
    ("BLK", "Financials"), ("SCHW", "Financials"), ("AXP", "Financials"),
    ("V", "Financials"), ("MA", "Financials"), ("PYPL", "Financials"),
    ("JNJ", "Healthcare"), ("UNH", "Healthcare"), ("PFE", "Healthcare"),
    ("MRK", "Healthcare"), ("ABBV", "Healthcare"), ("LLY", "Healthcare"),
    ("TMO", "Healthcare"), ("ABT", "Healthcare"), ("DHR", "Healthcare"),
    ("CVS", "Healthcare"), ("BMY", "Healthcare"), ("GILD", "Healthcare"),
    ("XOM", "Energy"), ("CVX", "Energy"), ("COP", "Energy"), ("SLB", "Energy"),
    ("OXY", "Energy"), ("PSX", "Energy"), ("VLO", "Energy"),
    ("BA", "Industrials"), ("CAT", "Industrials"), ("HON", "Industrials"),
    ("UPS", "Industrials"), ("GE", "Industrials"), ("LMT", "Industrials"),
    ("RTX", "Industrials"), ("UNP", "Industrials"), ("DE", "Industrials"),
    ("NEE", "Utilities"), ("DUK", "Utilities"), ("SO", "Utilities"),
    ("LIN", "Materials"), ("APD", "Materials"), ("SHW", "Materials"), ("FCX", "Materials"),
    ("AMT", "Real Estate"), ("PLD", "Real Estate"), ("SPG", "Real Estate"),
    ("T", "Communication Services"), ("VZ", "Communication Services"),
    ("DIS", "Communication Services"), ("CMCSA", "Communication Services"),
    ("NFLX", "Communication Services"), ("TMUS", "Communication Services"),
    ("SPY", "Index"), ("QQQ", "Index"), ("DIA", "Index"), ("IWM", "Index"),
];

pub fn sector_for(symbol: &str) -> &'static str {
    SECTOR_MAP
        .iter()
        .find(|(ticker, _)| *ticker == symbol)
        .map(|(_, sector)| *sector)
        .unwrap_or("Unknown")
}
