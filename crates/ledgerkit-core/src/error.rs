//! Error types for amount arithmetic and transaction balancing.

use thiserror::Error;

use crate::times::DateError;

/// Which operand of a binary operation was uninitialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uninitialized {
    /// The left-hand side has a value, the right-hand side does not.
    Right,
    /// The left-hand side has no value, the right-hand side does.
    Left,
    /// Neither side has a value.
    Both,
}

impl Uninitialized {
    /// Classify a pair of "has value" flags, or `None` if both have values.
    #[must_use]
    pub const fn classify(left_has_value: bool, right_has_value: bool) -> Option<Self> {
        match (left_has_value, right_has_value) {
            (true, true) => None,
            (true, false) => Some(Self::Right),
            (false, true) => Some(Self::Left),
            (false, false) => Some(Self::Both),
        }
    }
}

/// A binary operation over amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// Ordering comparison.
    Compare,
}

impl BinaryOp {
    fn uninitialized_message(self, side: &Uninitialized) -> &'static str {
        use Uninitialized::{Both, Left, Right};
        match (self, *side) {
            (Self::Add, Right) => "Cannot add an uninitialized amount to an amount",
            (Self::Add, Left) => "Cannot add an amount to an uninitialized amount",
            (Self::Add, Both) => "Cannot add two uninitialized amounts",
            (Self::Subtract, Right) => "Cannot subtract an uninitialized amount from an amount",
            (Self::Subtract, Left) => "Cannot subtract an amount from an uninitialized amount",
            (Self::Subtract, Both) => "Cannot subtract two uninitialized amounts",
            (Self::Multiply, Right) => "Cannot multiply an amount by an uninitialized amount",
            (Self::Multiply, Left) => "Cannot multiply an uninitialized amount by an amount",
            (Self::Multiply, Both) => "Cannot multiply two uninitialized amounts",
            (Self::Divide, Right) => "Cannot divide an amount by an uninitialized amount",
            (Self::Divide, Left) => "Cannot divide an uninitialized amount by an amount",
            (Self::Divide, Both) => "Cannot divide two uninitialized amounts",
            (Self::Compare, Right) => "Cannot compare an amount to an uninitialized amount",
            (Self::Compare, Left) => "Cannot compare an uninitialized amount to an amount",
            (Self::Compare, Both) => "Cannot compare two uninitialized amounts",
        }
    }
}

/// Errors raised by amount, commodity and annotation operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    /// A binary operation was attempted with an operand lacking a value.
    #[error("{}", .op.uninitialized_message(.side))]
    UninitializedOperand {
        /// The attempted operation.
        op: BinaryOp,
        /// Which side lacked a value.
        side: Uninitialized,
    },

    /// A unary operation was attempted on an amount lacking a value.
    #[error("{0}")]
    Uninitialized(&'static str),

    /// Adding amounts whose commodities differ.
    #[error("Adding amounts with different commodities: '{left}' != '{right}'")]
    AddingDifferentCommodities {
        /// Left commodity symbol.
        left: String,
        /// Right commodity symbol.
        right: String,
    },

    /// Subtracting amounts whose commodities differ.
    #[error("Subtracting amounts with different commodities: '{left}' != '{right}'")]
    SubtractingDifferentCommodities {
        /// Left commodity symbol.
        left: String,
        /// Right commodity symbol.
        right: String,
    },

    /// Comparing amounts whose commodities differ.
    #[error("Cannot compare amounts with different commodities: '{left}' and '{right}'")]
    ComparingDifferentCommodities {
        /// Left commodity symbol.
        left: String,
        /// Right commodity symbol.
        right: String,
    },

    /// Division by a zero amount.
    #[error("Divide by zero")]
    DivideByZero,

    /// Parsing found no digits.
    #[error("No quantity specified for amount")]
    NoQuantity,

    /// More than one decimal period.
    #[error("Too many periods in amount")]
    TooManyPeriods,

    /// A period used as a thousands mark at a wrong offset.
    #[error("Incorrect use of thousand-mark period")]
    IncorrectThousandMarkPeriod,

    /// More than one decimal comma.
    #[error("Too many commas in amount")]
    TooManyCommas,

    /// A decimal comma after a decimal period.
    #[error("Incorrect use of decimal comma")]
    IncorrectDecimalComma,

    /// A comma used as a thousands mark at a wrong offset.
    #[error("Incorrect use of thousand-mark comma")]
    IncorrectThousandMarkComma,

    /// The digits could not be turned into a number.
    #[error("Invalid quantity '{0}'")]
    InvalidQuantity(String),

    /// A quoted commodity symbol without a closing quote.
    #[error("Quoted commodity symbol lacks closing quote")]
    UnclosedQuote,

    /// Two `{price}` annotations.
    #[error("Commodity specifies more than one price")]
    MoreThanOnePrice,
    /// `{{` without the matching `}}`.
    #[error("Commodity lot price lacks double closing brace")]
    LotPriceLacksDoubleClosingBrace,
    /// `{` without the matching `}`.
    #[error("Commodity lot price lacks closing brace")]
    LotPriceLacksClosingBrace,
    /// Two `[date]` annotations.
    #[error("Commodity specifies more than one date")]
    MoreThanOneDate,
    /// `[` without the matching `]`.
    #[error("Commodity date lacks closing bracket")]
    DateLacksClosingBracket,
    /// Two `((expr))` annotations.
    #[error("Commodity specifies more than one valuation expresion")]
    MoreThanOneValueExpr,
    /// `((` without the matching `))`.
    #[error("Commodity valuation expression lacks closing parentheses")]
    ValueExprLacksClosingParentheses,
    /// Two `(tag)` annotations.
    #[error("Commodity specifies more than one tag")]
    MoreThanOneTag,
    /// `(` without the matching `)`.
    #[error("Commodity tag lacks closing parenthesis")]
    TagLacksClosingParenthesis,
    /// An annotation date that is not a date.
    #[error("Invalid date in commodity annotation: {0}")]
    InvalidAnnotationDate(String),

    /// Annotation details requested from an amount with a plain commodity.
    #[error("Request for annotation details from an unannotated amount")]
    NotAnnotated,

    /// A balance holding several commodities was asked for a single amount.
    #[error("Requested amount of a balance with multiple commodities: {0}")]
    MultipleCommodities(String),

    /// A numeric conversion overflowed the target type.
    #[error("Amount {0} does not fit in the requested type")]
    Overflow(String),

    /// A date inside a price entry or annotation failed to parse.
    #[error(transparent)]
    Date(#[from] DateError),
}

/// Errors raised by multi-commodity balance arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceError {
    /// Adding a null amount.
    #[error("Cannot add an uninitialized amount to a balance")]
    AddUninitialized,
    /// Subtracting a null amount.
    #[error("Cannot subtract an uninitialized amount from a balance")]
    SubtractUninitialized,
    /// Multiplying by a null amount.
    #[error("Cannot multiply a balance by an uninitialized amount")]
    MultiplyUninitialized,
    /// Dividing by a null amount.
    #[error("Cannot divide a balance by an uninitialized amount")]
    DivideUninitialized,
    /// Comparing with a null amount.
    #[error("Cannot compare a balance to an uninitialized amount")]
    CompareUninitialized,
    /// Scaling lots by a commoditized factor.
    #[error("Cannot multiply a balance with annotated commodities by a commoditized amount")]
    MultiplyAnnotated,
    /// Scaling several commodities by a commoditized factor.
    #[error("Cannot multiply a multi-commodity balance by a commoditized amount")]
    MultiplyMultiCommodity,
    /// Dividing lots by a commoditized divisor.
    #[error("Cannot divide a balance with annotated commodities by a commoditized amount")]
    DivideAnnotated,
    /// Dividing several commodities by a commoditized divisor.
    #[error("Cannot divide a multi-commodity balance by a commoditized amount")]
    DivideMultiCommodity,
    /// Division by zero.
    #[error("Divide by zero")]
    DivideByZero,
    /// Converting a balance with nothing in it.
    #[error("Cannot convert an empty balance to an amount")]
    EmptyToAmount,
    /// Converting a balance holding several commodities.
    #[error("Cannot convert a balance with multiple commodities to an amount")]
    MultipleToAmount,
    /// An amount error from one of the components.
    #[error(transparent)]
    Amount(#[from] AmountError),
}

/// Errors raised while parsing or evaluating a value expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    /// Malformed expression text.
    #[error("{0}")]
    Syntax(String),
    /// An identifier with no definition in scope.
    #[error("Unknown identifier '{0}'")]
    UnknownIdentifier(String),
    /// A call of something that is not a function.
    #[error("Calling unknown function '{0}'")]
    UnknownFunction(String),
    /// A binary operator applied to operands it does not support.
    #[error("Cannot {op} {left} and {right}")]
    TypeMismatch {
        /// The operation, in words.
        op: &'static str,
        /// Kind of the left operand.
        left: &'static str,
        /// Kind of the right operand.
        right: &'static str,
    },
    /// A unary operation or conversion the value does not support.
    #[error("Cannot {op} {kind}")]
    Unsupported {
        /// The operation, in words.
        op: &'static str,
        /// Kind of the operand.
        kind: &'static str,
    },
    /// A function called with the wrong arguments.
    #[error("Invalid arguments to function '{name}': expected {expected}")]
    BadArguments {
        /// The function.
        name: String,
        /// What was expected.
        expected: &'static str,
    },
    /// A regular expression that does not compile.
    #[error("Invalid regular expression '{pattern}': {message}")]
    Regex {
        /// The pattern text.
        pattern: String,
        /// The compiler's complaint.
        message: String,
    },
    /// An amount error during evaluation.
    #[error(transparent)]
    Amount(#[from] AmountError),
    /// A balance error during evaluation.
    #[error(transparent)]
    Balance(#[from] BalanceError),
    /// A date literal that is not a date.
    #[error(transparent)]
    Date(#[from] DateError),
}

/// Errors raised while finalizing (balancing) a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XactError {
    /// The postings do not sum to zero.
    #[error("Transaction does not balance")]
    DoesNotBalance {
        /// The unbalanced remainder, as printed.
        remainder: String,
        /// Sum of the positive postings, as printed.
        magnitude: String,
    },

    /// More than one posting lacks an amount.
    #[error("Only one posting with null amount allowed per transaction")]
    MultipleNullPosts,

    /// A null posting's account ends with a character that suggests a typo.
    #[error("Posting with null amount's account may be misspelled: \"{0}\"")]
    MisspelledNullPostAccount(String),

    /// A cost in the same commodity as the posting amount.
    #[error("A posting's cost must be of a different commodity than its amount")]
    CostInSameCommodity,

    /// Null postings remained after balancing.
    #[error("There cannot be null amounts after balancing a transaction")]
    NullAmountsAfterBalancing,

    /// An amount error occurred during balancing.
    #[error(transparent)]
    Amount(#[from] AmountError),

    /// A balance error occurred during balancing.
    #[error(transparent)]
    Balance(#[from] BalanceError),
}

/// Errors raised while adding items to a journal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JournalError {
    /// A posting used an undeclared account under `--pedantic`.
    #[error("Unknown account '{0}'")]
    UnknownAccount(String),
    /// A posting used an undeclared commodity under `--pedantic`.
    #[error("Unknown commodity '{0}'")]
    UnknownCommodity(String),
    /// A transaction used an undeclared payee under `--pedantic`.
    #[error("Unknown payee '{0}'")]
    UnknownPayee(String),
    /// An item used an undeclared metadata key under `--pedantic`.
    #[error("Unknown metadata tag '{0}'")]
    UnknownMetadataTag(String),
    /// Account aliases that refer to each other.
    #[error("Infinite recursion on alias expansion for {0}")]
    AliasRecursion(String),
    /// An automated transaction's `assert` was false.
    #[error("Transaction assertion failed: {0}")]
    TransactionAssertion(String),
    /// A `tag` directive's `assert` was false.
    #[error("Metadata assertion failed for ({key}: {value}): {expr}")]
    MetadataAssertion {
        /// Metadata key.
        key: String,
        /// Metadata value.
        value: String,
        /// The failed expression.
        expr: String,
    },
    /// A template posting with neither an amount nor an expression.
    #[error("Automated transaction's posting has no amount")]
    AutoPostWithoutAmount,
    /// A template expression that produced something other than an amount.
    #[error("Amount expressions must result in a simple amount")]
    AmountExprNotSimple,
    /// A second check-in to an account that is already clocked in.
    #[error("Cannot double check-in to the same account")]
    DoubleCheckin,
    /// A check-out with nothing clocked in.
    #[error("Timelog check-out event without a check-in")]
    CheckoutWithoutCheckin,
    /// An ambiguous check-out.
    #[error("When multiple check-ins are active, checking out requires an account")]
    CheckoutRequiresAccount,
    /// A check-out naming an account that is not clocked in.
    #[error("Timelog check-out event does not match any current check-ins")]
    CheckoutDoesNotMatch,
    /// A check-out earlier than its check-in.
    #[error("Timelog check-out date less than corresponding check-in")]
    CheckoutBeforeCheckin,
    /// The transaction built from a check-out was rejected.
    #[error("Failed to record 'out' timelog transaction")]
    FailedToRecordTimelog,
    /// Balancing failed.
    #[error(transparent)]
    Xact(#[from] XactError),
    /// An expression failed.
    #[error(transparent)]
    Expr(#[from] ExprError),
    /// An amount operation failed.
    #[error(transparent)]
    Amount(#[from] AmountError),
    /// A balance operation failed.
    #[error(transparent)]
    Balance(#[from] BalanceError),
}

/// Convenience alias for results of amount operations.
pub type AmountResult<T> = Result<T, AmountError>;

/// Convenience alias for results of expression parsing and evaluation.
pub type ExprResult<T> = Result<T, ExprError>;

/// Convenience alias for results of balance operations.
pub type BalanceResult<T> = Result<T, BalanceError>;

/// Convenience alias for results of journal operations.
pub type JournalResult<T> = Result<T, JournalError>;
