pub mod invoices;

pub use invoices::{
    ApiResponse, AuthorityReport, InvoiceResponse, ListInvoicesParams, Pagination,
    StatusUpdateRequest,
};
