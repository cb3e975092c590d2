mod adjustment;
mod bracket_table;
mod competencia;
mod computation_result;
mod contract;
mod direct_production;
mod fiscal_bond;
mod fiscal_parameters;
mod management_compensation;
mod physician;

pub use adjustment::{AdjustmentEntry, AdjustmentKind};
pub use bracket_table::{Bracket, BracketSetError, BracketTable, ContributorKind, NewBracketTable};
pub use competencia::{Competencia, ParseCompetenciaError};
pub use computation_result::{
    Annotation, AnnotationKind, ComputationItem, ComputationResult, ItemKind,
    NewComputationResult, ResultFamily,
};
pub use contract::{Contract, ContractShiftRate, ShiftRecord};
pub use direct_production::{AdministrativeProduction, PrivateProcedure};
pub use fiscal_bond::ExternalFiscalBond;
pub use fiscal_parameters::{CompanyFeeKind, FiscalParameters};
pub use management_compensation::ManagementCompensationEntry;
pub use physician::{CompanyLink, Physician};
