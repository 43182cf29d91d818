//! Deal catalog for the KFH Rewards tracker
//!
//! The catalog is the ordered list of deals whose quantities are tracked. It is
//! either the built-in list below or a JSON file supplied at startup.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;

use super::DealDefinition;

/// File name looked up in the XDG config directory
const CATALOG_FILE_NAME: &str = "deals.json";

/// Errors that can occur when loading a deal catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog file could not be read
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The catalog file is not a valid JSON deal list
    #[error("Failed to parse catalog {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Two deals share the same id
    #[error("Duplicate deal id in catalog: {0}")]
    DuplicateId(String),

    /// The catalog has no deals
    #[error("Catalog contains no deals")]
    Empty,
}

/// Source of the ordered deal catalog
///
/// The built-in catalogs never fail after construction. The `Result` leaves
/// room for implementations backed by something that can go away.
pub trait DealCatalog: Send + Sync {
    /// Returns every deal, in catalog order
    fn deals(&self) -> Result<Vec<DealDefinition>, CatalogError>;

    /// Looks up a single deal by id
    fn find(&self, id: &str) -> Result<Option<DealDefinition>, CatalogError> {
        Ok(self.deals()?.into_iter().find(|deal| deal.id == id))
    }
}

/// A catalog held in memory for the life of the process
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    deals: Vec<DealDefinition>,
}

impl StaticCatalog {
    /// Creates a catalog from a list of deals
    ///
    /// # Returns
    /// * `Err(CatalogError::Empty)` if `deals` is empty
    /// * `Err(CatalogError::DuplicateId)` if two deals share an id
    pub fn new(deals: Vec<DealDefinition>) -> Result<Self, CatalogError> {
        validate(&deals)?;
        Ok(Self { deals })
    }

    /// The built-in catalog of tracked deals
    pub fn builtin() -> Self {
        Self { deals: all_deals() }
    }

    /// Number of deals in the catalog
    pub fn len(&self) -> usize {
        self.deals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deals.is_empty()
    }
}

impl DealCatalog for StaticCatalog {
    fn deals(&self) -> Result<Vec<DealDefinition>, CatalogError> {
        Ok(self.deals.clone())
    }

    fn find(&self, id: &str) -> Result<Option<DealDefinition>, CatalogError> {
        Ok(self.deals.iter().find(|deal| deal.id == id).cloned())
    }
}

/// A catalog loaded from a JSON file
///
/// The file is read and validated once in `open`; later edits to it are not
/// seen until the process restarts.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
    deals: StaticCatalog,
}

impl FileCatalog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        let deals = StaticCatalog {
            deals: load_catalog_file(&path)?,
        };
        Ok(Self { path, deals })
    }

    /// Path the catalog was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.deals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deals.is_empty()
    }
}

impl DealCatalog for FileCatalog {
    fn deals(&self) -> Result<Vec<DealDefinition>, CatalogError> {
        self.deals.deals()
    }

    fn find(&self, id: &str) -> Result<Option<DealDefinition>, CatalogError> {
        self.deals.find(id)
    }
}

/// Reads and validates a JSON catalog file
///
/// The file must contain an array of `{id, title, url, points}` objects.
pub fn load_catalog_file(path: &Path) -> Result<Vec<DealDefinition>, CatalogError> {
    let content = fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let deals: Vec<DealDefinition> =
        serde_json::from_str(&content).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    validate(&deals)?;
    Ok(deals)
}

/// Location of the optional catalog file in the XDG config directory
///
/// Uses `~/.config/kfhrewards/deals.json` on Linux. Returns `None` if no home
/// directory can be determined.
pub fn default_catalog_path() -> Option<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "kfhrewards")?;
    Some(project_dirs.config_dir().join(CATALOG_FILE_NAME))
}

fn validate(deals: &[DealDefinition]) -> Result<(), CatalogError> {
    if deals.is_empty() {
        return Err(CatalogError::Empty);
    }
    let mut seen = HashSet::new();
    for deal in deals {
        if !seen.insert(deal.id.as_str()) {
            return Err(CatalogError::DuplicateId(deal.id.clone()));
        }
    }
    Ok(())
}

/// A built-in deal record
struct BuiltinDeal {
    id: &'static str,
    title: &'static str,
    url: &'static str,
    points: &'static str,
}

impl BuiltinDeal {
    fn to_definition(&self) -> DealDefinition {
        DealDefinition {
            id: self.id.to_string(),
            title: self.title.to_string(),
            url: self.url.to_string(),
            points_label: self.points.to_string(),
        }
    }
}

/// Deals tracked on rewards.kfh, in display order
static DEALS: [BuiltinDeal; 21] = [
    BuiltinDeal {
        id: "113316",
        title: "5 KD Off from Talabat",
        url: "https://rewards.kfh/redemption/dealdetails/113316/3-KD-Off-from-Talabat",
        points: "3000 KP",
    },
    BuiltinDeal {
        id: "113005",
        title: "10 KD Off from Talabat",
        url: "https://rewards.kfh/redemption/dealdetails/113005/10-KD-Off-from-Talabat",
        points: "10000 KP",
    },
    BuiltinDeal {
        id: "115708",
        title: "12 KD off from Keeta",
        url: "https://rewards.kfh/redemption/dealdetails/115708/Get-12-KD-off-from-Keeta",
        points: "12000 KP",
    },
    BuiltinDeal {
        id: "115707",
        title: "6 KD off from Keeta",
        url: "https://rewards.kfh/redemption/dealdetails/115707/Get-6-KD-off-from-Keeta",
        points: "6000 KP",
    },
    BuiltinDeal {
        id: "115706",
        title: "3 KD off from Keeta",
        url: "https://rewards.kfh/redemption/dealdetails/115706/Get-3-KD-off-from-Keeta",
        points: "3000 KP",
    },
    BuiltinDeal {
        id: "112772",
        title: "5 KD Deliveroo Wallet recharge",
        url: "https://rewards.kfh/redemption/dealdetails/112772/5-KD-Deliveroo-Wallet-recharge",
        points: "5000 KP",
    },
    BuiltinDeal {
        id: "112773",
        title: "3 KD Deliveroo Wallet recharge",
        url: "https://rewards.kfh/redemption/dealdetails/112773/3-KD-Deliveroo-Wallet-recharge",
        points: "3000 KP",
    },
    BuiltinDeal {
        id: "115482",
        title: "3 KD Off from Cari",
        url: "https://rewards.kfh/redemption/dealdetails/115482/3-KD-Off-from-Cari",
        points: "3000 KP",
    },
    BuiltinDeal {
        id: "115685",
        title: "5 KD Off from Caribou Coffee",
        url: "https://rewards.kfh/redemption/dealdetails/115685/5-KD-Off-from-Caribou-Coffee",
        points: "5000 KP",
    },
    BuiltinDeal {
        id: "115684",
        title: "3 KD Off from Caribou Coffee",
        url: "https://rewards.kfh/redemption/dealdetails/115684/3-KD-Off-from-Caribou-Coffee",
        points: "3000 KP",
    },
    BuiltinDeal {
        id: "113244",
        title: "5 KD gift card from COFE App",
        url: "https://rewards.kfh/redemption/dealdetails/113244/Get-a-5-KD-gift-card-from-COFE-App",
        points: "5000 KP",
    },
    BuiltinDeal {
        id: "115396",
        title: "16 KD Off from Al Rifai",
        url: "https://rewards.kfh/redemption/dealdetails/115396/16-KD-Off-from-Al-Rifai-On-the-Go-Minis-Bundle-",
        points: "16000 KP",
    },
    BuiltinDeal {
        id: "113256",
        title: "10 KD Off from Al Rifai",
        url: "https://rewards.kfh/redemption/dealdetails/113256/10-KD-Off-from-Al-Rifai",
        points: "10000 KP",
    },
    BuiltinDeal {
        id: "115315",
        title: "$10 iTunes Gift Card",
        url: "https://rewards.kfh/redemption/dealdetails/115315/10-iTunes-Gift-Card",
        points: "3500 KP",
    },
    BuiltinDeal {
        id: "115357",
        title: "5 KD from Zain",
        url: "https://rewards.kfh/redemption/dealdetails/115357/5KD-from-Zain",
        points: "5000 KP",
    },
    BuiltinDeal {
        id: "115371",
        title: "5 KD from STC",
        url: "https://rewards.kfh/redemption/dealdetails/115371/5KD-from-STC",
        points: "5000 KP",
    },
    BuiltinDeal {
        id: "113150",
        title: "20 KD Off from H&S Store",
        url: "https://rewards.kfh/redemption/dealdetails/113150/20-KD-Off-from-HS-Store",
        points: "20000 KP",
    },
    BuiltinDeal {
        id: "115762",
        title: "Get 5KD to be used in Winter Wonderland",
        url: "https://rewards.kfh/redemption/dealdetails/115762/Get-5-KD-Wallet-Recharge-for-3500-Points",
        points: "3500 KP",
    },
    BuiltinDeal {
        id: "115761",
        title: "Winter Wonderland Entry Ticket",
        url: "https://rewards.kfh/redemption/dealdetails/115761/Winter-Wonderland-Entry-Ticket-",
        points: "1400 KP",
    },
    BuiltinDeal {
        id: "115741",
        title: "Scientific Centre Entry Ticket",
        url: "https://rewards.kfh/redemption/dealdetails/115741/GET-Entry-Plus-ticket-and-save-to-enjoy-the-experience",
        points: "6000 KP",
    },
    BuiltinDeal {
        id: "115739",
        title: "Flare Black membership",
        url: "https://rewards.kfh/redemption/dealdetails/115739/Dont-miss-it--SAVE--GET-50--from-Flare-Black-membership",
        points: "50000 KP",
    },
];

/// Get all built-in deals, in catalog order
pub fn all_deals() -> Vec<DealDefinition> {
    DEALS.iter().map(BuiltinDeal::to_definition).collect()
}
