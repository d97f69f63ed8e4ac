// 🧪 Test Fixtures - Labelled LP/GP records shared by module tests

use crate::classifier::{LabelSource, TrainingExample};
use crate::embedding::EmbeddingTable;
use crate::features::FeatureExtractor;
use crate::record::{DataSource, OrgType, OrganizationRecord, PartyRole, RecordProfile};
use chrono::{TimeZone, Utc};

/// Small builder so fixtures read like the data they describe
pub(crate) struct Org(OrganizationRecord);

impl Org {
    pub fn new(id: &str, name: &str) -> Self {
        let mut record = OrganizationRecord::new(name, DataSource::BulkImport);
        record.id = id.to_string();
        record.updated_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Org(record)
    }

    pub fn kind(mut self, org_type: OrgType) -> Self {
        self.0.org_type = org_type;
        self
    }

    pub fn lp(mut self) -> Self {
        self.0.role = PartyRole::Lp;
        self
    }

    pub fn gp(mut self) -> Self {
        self.0.role = PartyRole::Gp;
        self
    }

    pub fn at(mut self, city: &str, country: &str) -> Self {
        self.0.city = Some(city.to_string());
        self.0.country = Some(country.to_string());
        self
    }

    pub fn web(mut self, website: &str) -> Self {
        self.0.website = Some(website.to_string());
        self
    }

    pub fn aum(mut self, aum_usd_m: f64) -> Self {
        self.0.aum_usd_m = Some(aum_usd_m);
        self
    }

    pub fn ext(mut self, external_id: &str) -> Self {
        self.0.external_id = Some(external_id.to_string());
        self
    }

    pub fn strategies(mut self, tags: &[&str]) -> Self {
        self.0.strategies = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn source(mut self, source: DataSource) -> Self {
        self.0.data_source = source;
        self
    }

    pub fn updated(mut self, year: i32, month: u32, day: u32) -> Self {
        self.0.updated_at = Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap();
        self
    }

    pub fn build(self) -> OrganizationRecord {
        self.0
    }
}

fn pension(id: &str, name: &str, city: &str, country: &str, aum: f64) -> OrganizationRecord {
    Org::new(id, name)
        .kind(OrgType::Pension)
        .lp()
        .at(city, country)
        .aum(aum)
        .build()
}

// ============================================================================
// BLOCKING FIXTURE (records + ground-truth entity labels)
// ============================================================================

pub(crate) struct LabelledRecords {
    pub records: Vec<OrganizationRecord>,
    /// entity[i] = real-world entity of records[i]
    pub entity: Vec<&'static str>,
}

impl LabelledRecords {
    /// Every pair of record ids that refers to the same entity (left < right)
    pub fn true_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for i in 0..self.records.len() {
            for j in (i + 1)..self.records.len() {
                if self.entity[i] == self.entity[j] {
                    let (a, b) = (&self.records[i].id, &self.records[j].id);
                    if a < b {
                        pairs.push((a.clone(), b.clone()));
                    } else {
                        pairs.push((b.clone(), a.clone()));
                    }
                }
            }
        }
        pairs
    }
}

pub(crate) fn labelled_records() -> LabelledRecords {
    let rows: Vec<(&'static str, OrganizationRecord)> = vec![
        ("calpers", pension("r01", "California Public Employees' Retirement System", "Sacramento", "US", 502_000.0)),
        ("calpers", pension("r02", "CalPERS", "Sacramento", "US", 500_000.0)),
        ("calstrs", pension("r03", "California State Teachers' Retirement System", "West Sacramento", "US", 330_000.0)),
        ("calstrs", pension("r04", "CalSTRS", "West Sacramento", "US", 331_000.0)),
        ("nystrs", pension("r05", "New York State Teachers' Retirement System", "Albany", "US", 140_000.0)),
        ("nystrs", pension("r06", "NYSTRS", "Albany", "US", 138_000.0)),
        ("swib", pension("r07", "State of Wisconsin Investment Board", "Madison", "US", 160_000.0)),
        ("swib", pension("r08", "SWIB", "Madison", "US", 160_000.0)),
        ("otpp", pension("r09", "Ontario Teachers' Pension Plan", "Toronto", "CA", 250_000.0)),
        ("otpp", pension("r10", "Ontario Teachers Pension Plan Board", "Toronto", "CA", 247_000.0)),
        ("omers", pension("r11", "Ontario Municipal Employees Retirement System", "Toronto", "CA", 130_000.0)),
        (
            "blackstone",
            Org::new("r12", "Blackstone Inc.").kind(OrgType::PrivateEquity).gp().at("New York", "US").web("https://www.blackstone.com").aum(1_000_000.0).build(),
        ),
        (
            "blackstone",
            Org::new("r13", "The Blackstone Group").kind(OrgType::PrivateEquity).gp().at("New York", "US").build(),
        ),
        (
            "blackstone",
            Org::new("r14", "Blackstone Group L.P.").gp().at("New York", "US").web("blackstone.com").build(),
        ),
        (
            "blackrock",
            Org::new("r15", "BlackRock").kind(OrgType::HedgeFund).gp().at("New York", "US").web("blackrock.com").build(),
        ),
        (
            "kkr",
            Org::new("r16", "Kohlberg Kravis Roberts & Co.").kind(OrgType::PrivateEquity).gp().at("New York", "US").build(),
        ),
        (
            "kkr",
            Org::new("r17", "KKR").kind(OrgType::PrivateEquity).gp().at("New York", "US").web("kkr.com").build(),
        ),
        (
            "apollo",
            Org::new("r18", "Apollo Global Management").kind(OrgType::PrivateEquity).gp().at("New York", "US").build(),
        ),
        (
            "apollo",
            Org::new("r19", "Apollo Global Management, Inc.").kind(OrgType::PrivateEquity).gp().at("New York", "US").build(),
        ),
        (
            "apollo_edu",
            Org::new("r20", "Apollo Education Group").at("Phoenix", "US").build(),
        ),
        (
            "nbim",
            Org::new("r21", "Norges Bank Investment Management").kind(OrgType::SovereignWealth).lp().at("Oslo", "NO").build(),
        ),
        (
            "nbim",
            Org::new("r22", "NBIM").kind(OrgType::SovereignWealth).lp().at("Oslo", "NO").build(),
        ),
        (
            "adia",
            Org::new("r23", "Abu Dhabi Investment Authority").kind(OrgType::SovereignWealth).lp().at("Abu Dhabi", "AE").build(),
        ),
        (
            "adia",
            Org::new("r24", "ADIA").kind(OrgType::SovereignWealth).lp().at("Abu Dhabi", "AE").build(),
        ),
        (
            "gic",
            Org::new("r25", "GIC Private Limited").kind(OrgType::SovereignWealth).lp().at("Singapore", "SG").build(),
        ),
        (
            "gic",
            Org::new("r26", "GIC").kind(OrgType::SovereignWealth).lp().at("Singapore", "SG").build(),
        ),
        (
            "yale",
            Org::new("r27", "Yale University Investments Office").kind(OrgType::Endowment).lp().at("New Haven", "US").build(),
        ),
        (
            "yale",
            Org::new("r28", "Yale Investments Office").kind(OrgType::Endowment).lp().at("New Haven", "US").build(),
        ),
        (
            "sequoia",
            Org::new("r29", "Sequoia Capital").kind(OrgType::VentureCapital).gp().at("Menlo Park", "US").build(),
        ),
        (
            "sequoia",
            Org::new("r30", "Sequoia Capital Operations LLC").kind(OrgType::VentureCapital).gp().at("Menlo Park", "US").build(),
        ),
        (
            "carlyle",
            Org::new("r31", "Carlyle Group").kind(OrgType::PrivateEquity).gp().at("Washington", "US").build(),
        ),
        (
            "carlyle",
            Org::new("r32", "The Carlyle Group Inc.").kind(OrgType::PrivateEquity).gp().at("Washington", "US").build(),
        ),
        (
            "cppib",
            pension("r33", "Canada Pension Plan Investment Board", "Toronto", "CA", 400_000.0),
        ),
        ("cppib", pension("r34", "CPPIB", "Toronto", "CA", 400_000.0)),
        (
            "hamilton",
            Org::new("r35", "Hamilton Lane").kind(OrgType::FundOfFunds).gp().at("Conshohocken", "US").build(),
        ),
        (
            "hamilton",
            Org::new("r36", "Hamilton Lane Advisors").kind(OrgType::FundOfFunds).gp().at("Conshohocken", "US").build(),
        ),
        (
            "wellcome",
            Org::new("r37", "Wellcome Trust").kind(OrgType::Foundation).lp().at("London", "GB").build(),
        ),
        (
            "wellcome",
            Org::new("r38", "The Wellcome Trust").kind(OrgType::Foundation).lp().at("London", "GB").build(),
        ),
        (
            "adams",
            Org::new("r39", "Adams Street Partners").kind(OrgType::FundOfFunds).gp().at("Chicago", "US").build(),
        ),
        (
            "adams",
            Org::new("r40", "Adams Street Partnres").kind(OrgType::FundOfFunds).gp().at("Chicago", "US").build(),
        ),
        (
            "harvard",
            Org::new("r41", "Harvard Management Company").kind(OrgType::Endowment).lp().at("Boston", "US").build(),
        ),
        (
            "harvard",
            Org::new("r42", "Harvard Management Co").kind(OrgType::Endowment).lp().at("Boston", "US").build(),
        ),
        (
            "texas_psf",
            pension("r43", "Texas Permanent School Fund", "Austin", "US", 50_000.0),
        ),
        (
            "texas_psf",
            pension("r44", "Texas PSF", "Austin", "US", 50_000.0),
        ),
        (
            "tcdrs",
            pension("r45", "Texas County & District Retirement System", "Austin", "US", 40_000.0),
        ),
        (
            "sequoia_heritage",
            Org::new("r46", "Sequoia Heritage").kind(OrgType::FamilyOffice).lp().at("Menlo Park", "US").build(),
        ),
    ];

    let (entity, records) = rows.into_iter().unzip();
    LabelledRecords { records, entity }
}

// ============================================================================
// CLASSIFIER FIXTURE (labelled pairs)
// ============================================================================

/// Labelled pairs for training; CalPERS is deliberately absent so it can be
/// used as an unseen example
pub(crate) fn training_pairs() -> Vec<(OrganizationRecord, OrganizationRecord, bool)> {
    let mut pairs = Vec::new();

    // Abbreviations of pension systems (same city, country, type, role)
    let abbreviations: [(&str, &str, &str, &str, f64); 10] = [
        ("California State Teachers' Retirement System", "CalSTRS", "West Sacramento", "US", 330_000.0),
        ("Ohio Public Employees Retirement System", "OPERS", "Columbus", "US", 120_000.0),
        ("Pennsylvania Public School Employees' Retirement System", "PSERS", "Harrisburg", "US", 75_000.0),
        ("New York State Teachers' Retirement System", "NYSTRS", "Albany", "US", 140_000.0),
        ("Teacher Retirement System", "TRS", "Austin", "US", 200_000.0),
        ("State of Wisconsin Investment Board", "SWIB", "Madison", "US", 160_000.0),
        ("Los Angeles County Employees Retirement Association", "LACERA", "Pasadena", "US", 75_000.0),
        ("New York City Employees' Retirement System", "NYCERS", "New York", "US", 90_000.0),
        ("Illinois Municipal Retirement Fund", "IMRF", "Oak Brook", "US", 50_000.0),
        ("Massachusetts Pension Reserves Investment Management", "MassPRIM", "Boston", "US", 100_000.0),
    ];
    for (n, (long, short, city, country, aum)) in abbreviations.iter().enumerate() {
        pairs.push((
            pension(&format!("ab{:02}l", n), long, city, country, *aum),
            pension(&format!("ab{:02}s", n), short, city, country, aum * 0.99),
            true,
        ));
    }

    // Formatting variants and typos
    let variants: [(&str, &str, OrgType, bool, &str, &str); 10] = [
        ("Blackstone Inc.", "The Blackstone Group", OrgType::PrivateEquity, true, "New York", "US"),
        ("Apollo Global Management", "Apollo Global Management, Inc.", OrgType::PrivateEquity, true, "New York", "US"),
        ("Sequoia Capital", "Sequoia Capital Operations LLC", OrgType::VentureCapital, true, "Menlo Park", "US"),
        ("Carlyle Group", "The Carlyle Group Inc.", OrgType::PrivateEquity, true, "Washington", "US"),
        ("Adams Street Partners", "Adams Street Partnres", OrgType::FundOfFunds, true, "Chicago", "US"),
        ("Hamilton Lane", "Hamilton Lane Advisors", OrgType::FundOfFunds, true, "Conshohocken", "US"),
        ("Yale University Investments Office", "Yale Investments Office", OrgType::Endowment, false, "New Haven", "US"),
        ("Wellcome Trust", "The Wellcome Trust", OrgType::Foundation, false, "London", "GB"),
        ("Harvard Management Company", "Harvard Management Co", OrgType::Endowment, false, "Boston", "US"),
        ("Ontario Teachers' Pension Plan", "Ontario Teachers Pension Plan Board", OrgType::Pension, false, "Toronto", "CA"),
    ];
    for (n, (a, b, kind, is_gp, city, country)) in variants.iter().enumerate() {
        let build = |id: String, name: &str| {
            let org = Org::new(&id, name).kind(*kind).at(city, country);
            let org = if *is_gp { org.gp() } else { org.lp() };
            org.build()
        };
        pairs.push((build(format!("va{:02}a", n), *a), build(format!("va{:02}b", n), *b), true));
    }

    // Hard negatives: shared city/type/role or shared tokens, different entity
    let negatives: [(&str, &str, &str, &str, f64, f64); 12] = [
        ("California Public Employees' Retirement System", "CalSTRS", "Sacramento", "US", 502_000.0, 330_000.0),
        ("California State Teachers' Retirement System", "California Public Employees' Retirement System", "Sacramento", "US", 330_000.0, 502_000.0),
        ("Ohio Public Employees Retirement System", "State Teachers Retirement System of Ohio", "Columbus", "US", 120_000.0, 95_000.0),
        ("New York State Teachers' Retirement System", "New York State Common Retirement Fund", "Albany", "US", 140_000.0, 250_000.0),
        ("NYCERS", "New York State Teachers' Retirement System", "New York", "US", 90_000.0, 140_000.0),
        ("Texas County & District Retirement System", "Texas Permanent School Fund", "Austin", "US", 40_000.0, 50_000.0),
        ("TRS", "Employees Retirement System of Texas", "Austin", "US", 200_000.0, 40_000.0),
        ("Ontario Municipal Employees Retirement System", "Ontario Teachers' Pension Plan", "Toronto", "CA", 130_000.0, 250_000.0),
        ("Canada Pension Plan Investment Board", "Ontario Teachers' Pension Plan", "Toronto", "CA", 400_000.0, 250_000.0),
        ("Illinois Municipal Retirement Fund", "Illinois State Board of Investment", "Chicago", "US", 50_000.0, 30_000.0),
        ("Los Angeles Fire and Police Pensions", "LACERA", "Los Angeles", "US", 30_000.0, 75_000.0),
        ("Pennsylvania State Employees' Retirement System", "Pennsylvania Public School Employees' Retirement System", "Harrisburg", "US", 35_000.0, 75_000.0),
    ];
    for (n, (a, b, city, country, aum_a, aum_b)) in negatives.iter().enumerate() {
        pairs.push((
            pension(&format!("ng{:02}a", n), a, city, country, *aum_a),
            pension(&format!("ng{:02}b", n), b, city, country, *aum_b),
            false,
        ));
    }

    let gp_negatives: [(&str, &str, &str); 8] = [
        ("Blackstone Inc.", "BlackRock", "New York"),
        ("Apollo Global Management", "Apollo Education Group", "New York"),
        ("Sequoia Capital", "Sequoia Heritage", "Menlo Park"),
        ("Carlyle Group", "Carlyle Capital Markets", "Washington"),
        ("Kohlberg Kravis Roberts & Co.", "Warburg Pincus", "New York"),
        ("Hamilton Lane", "HarbourVest Partners", "Boston"),
        ("Adams Street Partners", "Adams Capital Management", "Chicago"),
        ("General Atlantic", "Atlantic Street Capital", "New York"),
    ];
    for (n, (a, b, city)) in gp_negatives.iter().enumerate() {
        pairs.push((
            Org::new(&format!("gn{:02}a", n), a).kind(OrgType::PrivateEquity).gp().at(city, "US").build(),
            Org::new(&format!("gn{:02}b", n), b).kind(OrgType::PrivateEquity).gp().at(city, "US").build(),
            false,
        ));
    }

    pairs
}

/// The unseen CalPERS pair
pub(crate) fn calpers_pair() -> (OrganizationRecord, OrganizationRecord) {
    (
        pension("cp-long", "California Public Employees' Retirement System", "Sacramento", "US", 502_000.0),
        pension("cp-short", "CalPERS", "Sacramento", "US", 500_000.0),
    )
}

/// Training pairs turned into human-labelled examples (no embeddings)
pub(crate) fn fixture_examples() -> Vec<TrainingExample> {
    let extractor = FeatureExtractor::new();
    let table = EmbeddingTable::disabled();
    training_pairs()
        .into_iter()
        .map(|(a, b, label)| {
            let pa = RecordProfile::from_record(&a);
            let pb = RecordProfile::from_record(&b);
            TrainingExample {
                left_id: a.id.clone(),
                right_id: b.id.clone(),
                features: extractor.extract((&a, &pa), (&b, &pb), &table),
                label,
                source: LabelSource::Human,
            }
        })
        .collect()
}
