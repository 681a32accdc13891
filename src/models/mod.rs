// Models module - Database entity representations

pub mod beneficiary;
pub mod merchant_voucher;
pub mod page;
pub mod transaction;
pub mod voucher;

pub use beneficiary::Beneficiary;
pub use merchant_voucher::MerchantVoucher;
pub use page::{Page, PageRequest};
pub use transaction::{NewTransaction, Transaction};
pub use voucher::{
    GenerationMethod, NewVoucher, Voucher, VoucherChanges, VoucherDetails, VoucherFilter,
    VoucherStatus, VoucherType,
};
